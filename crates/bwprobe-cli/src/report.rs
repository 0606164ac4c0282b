//! Plain-text report formatting

use bwprobe_core::{
    BenchmarkReport, Catalog, Matrix, Payload, PoolAccess, RequestKind, Topology, Transaction,
};
use bwprobe_model::link::NO_PATH;
use bwprobe_model::sizes::MIB;
use bwprobe_model::units;
use std::collections::BTreeSet;

const INDENT: &str = "          ";

/// Human size label: bytes below 1 KiB, KB below 1 MiB, else MB
pub fn size_label(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{bytes} Bytes")
    } else if bytes < MIB {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} MB", bytes / MIB)
    }
}

/// Seconds as microseconds, or FAIL for the sentinel
pub fn micros(seconds: f64) -> String {
    if units::is_failure(seconds) {
        "FAIL".to_string()
    } else {
        format!("{:.6}", seconds * 1e6)
    }
}

/// GB/s figure, or FAIL for the sentinel
pub fn gbps(value: f64) -> String {
    if units::is_failure(value) {
        "FAIL".to_string()
    } else {
        format!("{value:.6}")
    }
}

/// Access mode as printed in the pool listing
pub fn access_label(access: PoolAccess) -> &'static str {
    match access {
        PoolAccess::NeverAllowed => "never allowed",
        PoolAccess::AllowedByDefault => "allowed by default",
        PoolAccess::DisallowedByDefault => "disallowed by default",
    }
}

pub fn print_version() {
    println!();
    println!("{INDENT}bwprobe version: {}", env!("CARGO_PKG_VERSION"));
}

/// Active agents with name and PCIe location
pub fn print_devices(catalog: &Catalog, active: &BTreeSet<usize>) {
    println!();
    for agent in catalog.agents().iter().filter(|a| active.contains(&a.index)) {
        match &agent.bdf {
            Some(bdf) => println!("{INDENT}Device: {},  {},  {bdf}", agent.index, agent.name),
            None => println!("{INDENT}Device: {},  {}", agent.index, agent.name),
        }
    }
    println!();
}

/// Every agent with its eligible pools
pub fn print_agents(catalog: &Catalog) {
    println!();
    for agent in catalog.agents() {
        println!("{INDENT}Device Index:                             {}", agent.index);
        println!("{INDENT}  Device Type:                            {}", agent.class);
        if let Some(bdf) = &agent.bdf {
            println!("{INDENT}  Device  BDF:                            {bdf}");
        }
        for &index in &agent.pools {
            if let Ok(pool) = catalog.pool(index) {
                let grain = if pool.fine_grained { "fine" } else { "coarse" };
                println!(
                    "{INDENT}    Pool {index} ({grain}) Allocatable Memory Size (KB): {}",
                    pool.size / 1024
                );
                println!(
                    "{INDENT}      Owner Access: {}  Kernarg: {}",
                    access_label(pool.owner_access),
                    if pool.kernarg { "yes" } else { "no" }
                );
            }
        }
        println!();
    }
}

fn print_matrix<T>(title: &str, matrix: &Matrix<T>, cell: impl Fn(&T) -> String) {
    println!("{INDENT}{title}");
    println!();
    print!("{INDENT}{:<10}", "D/D");
    for column in 0..matrix.size() {
        print!("{column:<12}");
    }
    println!();
    println!();
    for (index, row) in matrix.rows().enumerate() {
        print!("{INDENT}{index:<10}");
        for value in row {
            print!("{:<12}", cell(value));
        }
        println!();
        println!();
    }
}

fn path_value(value: u32) -> String {
    if value == NO_PATH {
        "N/A".to_string()
    } else {
        value.to_string()
    }
}

pub fn print_access_matrix(topology: &Topology) {
    print_matrix("Inter-Device Access", topology.reachability.classes(), ToString::to_string);
}

pub fn print_weight_matrix(topology: &Topology) {
    print_matrix("Inter-Device Numa Distance", topology.links.matrix(), |l| path_value(l.weight));
}

pub fn print_hops_matrix(topology: &Topology) {
    print_matrix("Inter-Device Hops", topology.links.matrix(), |l| path_value(l.hops));
}

pub fn print_link_type_matrix(topology: &Topology) {
    print_matrix("Inter-Device Link Type", topology.links.matrix(), |l| l.link_type.to_string());
}

/// Size table of one copy transaction
pub fn print_transaction(catalog: &Catalog, transaction: &Transaction, sizes: &[usize], latency: bool) {
    let Payload::Copy(copy) = &transaction.payload else {
        return;
    };
    let class = |agent: usize| catalog.agent(agent).map(|a| a.class.to_string()).unwrap_or_default();
    println!();
    println!("================           Benchmark Result         ================");
    println!(
        "================ Src Device Id: {} Src Device Type: {} ================",
        copy.src_pool,
        class(copy.src_agent)
    );
    println!(
        "================ Dst Device Id: {} Dst Device Type: {} ================",
        copy.dst_pool,
        class(copy.dst_agent)
    );
    println!();

    let r = &transaction.results;
    if latency {
        println!("{:<15}{:<15}{:<15}", "Data Size", "Avg Time(us)", "Min Time(us)");
        for (i, &size) in sizes.iter().enumerate() {
            println!(
                "{:<15}{:<15}{:<15}",
                size_label(size),
                r.avg_time.get(i).map_or_else(String::new, |&t| micros(t)),
                r.min_time.get(i).map_or_else(String::new, |&t| micros(t)),
            );
        }
        return;
    }
    println!(
        "{:<15}{:<15}{:<15}{:<15}{:<15}",
        "Data Size", "Avg Time(us)", "Avg BW(GB/s)", "Min Time(us)", "Peak BW(GB/s)"
    );
    for (i, &size) in sizes.iter().enumerate() {
        let (Some(&avg), Some(&avg_bw), Some(&min), Some(&peak)) = (
            r.avg_time.get(i),
            r.avg_bandwidth.get(i),
            r.min_time.get(i),
            r.peak_bandwidth.get(i),
        ) else {
            continue;
        };
        println!(
            "{:<15}{:<15}{:<15}{:<15}{:<15}",
            size_label(size),
            micros(avg),
            gbps(avg_bw),
            micros(min),
            gbps(peak)
        );
    }
}

/// Print a finished run the way its kind calls for
pub fn print_report(catalog: &Catalog, topology: &Topology, report: &BenchmarkReport) {
    if report.transactions.is_empty() {
        println!();
        println!("{INDENT}No transactions to run");
        println!();
        return;
    }

    let agents = catalog.agent_count();
    if let Some(matrix) = report.validation_matrix(agents) {
        print_version();
        print_devices(catalog, &report.active_agents);
        print_access_matrix(topology);
        print_matrix("Data Path Validation", &matrix, |v| {
            match v {
                Some(true) => "PASS",
                Some(false) => "FAIL",
                None => "N/A",
            }
            .to_string()
        });
        return;
    }

    if report.kind.is_all_pairs() {
        if report.show_topology {
            print_version();
            print_devices(catalog, &report.active_agents);
            print_access_matrix(topology);
            print_weight_matrix(topology);
        }
        let direction = if report.kind.is_bidirectional() {
            "Bidirectional"
        } else {
            "Unidirectional"
        };
        for (peak, label) in [(true, "peak"), (false, "average")] {
            if let Some(matrix) = report.bandwidth_matrix(agents, peak) {
                print_matrix(
                    &format!("{direction} copy {label} bandwidth GB/s"),
                    &matrix,
                    |v| v.map_or_else(|| "N/A".to_string(), gbps),
                );
            }
        }
        return;
    }

    if matches!(
        report.kind,
        RequestKind::CopyUnidirectional | RequestKind::CopyBidirectional
    ) {
        print_version();
    }
    for transaction in &report.transactions {
        print_transaction(catalog, transaction, report.sizes.as_slice(), report.latency);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_labels() {
        assert_eq!(size_label(512), "512 Bytes");
        assert_eq!(size_label(64 * 1024), "64 KB");
        assert_eq!(size_label(32 * MIB), "32 MB");
    }

    #[test]
    fn sentinel_prints_as_fail() {
        assert_eq!(micros(units::VALIDATION_FAILURE), "FAIL");
        assert_eq!(gbps(units::VALIDATION_FAILURE), "FAIL");
        assert_eq!(micros(0.000_001), "1.000000");
        assert_eq!(gbps(12.5), "12.500000");
    }

    #[test]
    fn owner_access_labels() {
        assert_eq!(access_label(PoolAccess::AllowedByDefault), "allowed by default");
        assert_eq!(access_label(PoolAccess::NeverAllowed), "never allowed");
    }
}
