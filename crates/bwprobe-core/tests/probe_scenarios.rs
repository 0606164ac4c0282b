//! End-to-end probe scenarios on the software platform
//!
//! Every test here runs discovery, topology, planning and execution against
//! a simulated fabric, so none of them need hardware.

use bwprobe_core::{
    BenchmarkExecutor, BwError, Catalog, FabricPreset, FabricSpec, Platform, Reachability,
    Request, RunConfig, Session, SizeList, SoftwarePlatform, TransactionBuilder, ENV_RUN_BLOCKING,
};
use bwprobe_model::link::{HopKind, LinkHop};
use bwprobe_model::sizes::MIB;
use bwprobe_model::units;

fn open(preset: FabricPreset) -> Session {
    let platform = SoftwarePlatform::preset(preset).expect("preset");
    Session::open(Box::new(platform), RunConfig::default()).expect("session")
}

fn copy_endpoints(session: &Session, request: &Request) -> Vec<(usize, usize)> {
    session
        .plan(request)
        .expect("plan")
        .transactions
        .transactions
        .iter()
        .filter_map(|t| t.as_copy())
        .map(|c| (c.src_agent, c.dst_agent))
        .collect()
}

/// Host plus one accelerator on a single PCIe hop of exactly 1 MiB per ms
fn metered_fabric() -> SoftwarePlatform {
    let mut fabric = FabricSpec::new();
    let cpu = fabric.host("cpu0");
    let gpu = fabric.accelerator("gpu0", 0x0300);
    fabric.host_pools(cpu);
    fabric.accelerator_pools(gpu);
    fabric.link(
        cpu,
        gpu,
        vec![LinkHop::new(HopKind::Pcie, 20).with_bandwidth(1.048_576)],
    );
    fabric.set_copy_latency(0);
    SoftwarePlatform::new(fabric).expect("fabric")
}

#[test]
fn three_agents_give_three_bidirectional_pairs() {
    let session = open(FabricPreset::Workstation);
    let pairs = copy_endpoints(&session, &Request::all_pairs(true));
    assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    assert!(pairs.iter().all(|(a, b)| a != b));
}

#[test]
fn no_transaction_joins_two_hosts() {
    let session = open(FabricPreset::TwoSocket);
    let catalog = session.catalog();
    for request in [Request::all_pairs(false), Request::all_pairs(true)] {
        let plan = session.plan(&request).expect("plan");
        assert!(!plan.transactions.transactions.is_empty());
        for t in &plan.transactions.transactions {
            let copy = t.as_copy().expect("copy");
            let src = catalog.agent(copy.src_agent).expect("src");
            let dst = catalog.agent(copy.dst_agent).expect("dst");
            assert!(!(src.class.is_host() && dst.class.is_host()), "{copy:?}");
        }
    }
}

#[test]
fn unreachable_explicit_pair_aborts_planning() {
    let session = open(FabricPreset::TwoSocket);
    let gpu0 = session.catalog().agent(2).expect("gpu0").pools[0];
    let gpu3 = session.catalog().agent(5).expect("gpu3").pools[0];
    let err = session
        .run(&Request::unidirectional(vec![gpu0], vec![gpu3]))
        .expect_err("no path");
    assert!(matches!(err, BwError::NoAccessPath { .. }));
    assert!(!err.is_fatal_environment());
}

#[test]
fn one_way_pair_still_runs_both_directions() {
    let session = open(FabricPreset::TwoSocket);
    let gpu1 = session.catalog().agent(3).expect("gpu1").pools[0];
    let gpu2 = session.catalog().agent(4).expect("gpu2").pools[0];
    let request = Request::unidirectional(vec![gpu1, gpu2], vec![gpu1, gpu2]).with_sizes_mb(vec![1]);
    let report = session.run(&request).expect("run");
    assert_eq!(report.transactions.len(), 4);
    assert!(report.validation_passed());
    session.close().expect("close");
}

#[test]
fn user_sizes_are_sorted_mebibytes() {
    let session = open(FabricPreset::Workstation);
    let plan = session
        .plan(&Request::unidirectional(vec![0], vec![1]).with_sizes_mb(vec![8, 2, 4]))
        .expect("plan");
    assert_eq!(plan.sizes.as_slice(), &[2 * 1_048_576, 4 * 1_048_576, 8 * 1_048_576]);
}

#[test]
fn every_result_vector_matches_the_size_list() {
    let session = open(FabricPreset::DualXgmi);
    let requests = [
        Request::unidirectional(vec![0, 1], vec![1, 2]).with_sizes_mb(vec![1, 2]),
        Request::bidirectional(vec![0, 1, 2]).with_sizes_mb(vec![1, 2]),
        Request::concurrent(vec![0, 1, 1, 2], false).with_sizes_mb(vec![1, 2]),
        Request::concurrent(vec![0, 1, 2, 1], true).with_sizes_mb(vec![1, 2]),
    ];
    for request in requests {
        let report = session.run(&request).expect("run");
        assert!(!report.transactions.is_empty());
        for t in &report.transactions {
            let r = &t.results;
            for len in [
                r.host_avg.len(),
                r.host_min.len(),
                r.device_avg.len(),
                r.device_min.len(),
                r.avg_time.len(),
                r.min_time.len(),
                r.avg_bandwidth.len(),
                r.peak_bandwidth.len(),
            ] {
                assert_eq!(len, report.sizes.len(), "{}", request.kind);
            }
            assert!(r.min_time.iter().zip(&r.avg_time).all(|(min, avg)| min <= avg));
        }
        assert_eq!(report.exit_code, 0);
    }
}

#[test]
fn validation_runs_a_single_iteration() {
    let platform = SoftwarePlatform::preset(FabricPreset::Workstation).expect("preset");
    let config = RunConfig::default();
    let catalog = Catalog::discover(&platform, &config).expect("catalog");
    let reach = Reachability::build(&platform, &catalog).expect("reach");
    // an explicit iteration count is still overridden by validation
    let request = Request::unidirectional(vec![0], vec![1]).with_iterations(50).validated();
    let mut plan = TransactionBuilder::new(&catalog, &reach).build(&request).expect("plan");

    let mut executor = BenchmarkExecutor::new(&platform, &catalog, &config);
    executor
        .run(&request, &mut plan, &SizeList::from_bytes(vec![MIB]))
        .expect("run");
    // one timed copy plus one read-back; the host source needs no device copy
    assert_eq!(platform.copies_completed().expect("count"), 2);
    assert_eq!(executor.exit_code(), 0);
    assert!(plan.transactions[0].validation_passed());
}

#[test]
fn one_mebibyte_in_one_millisecond() {
    let platform = metered_fabric();
    let session = Session::open(Box::new(platform), RunConfig::default()).expect("session");
    let report = session
        .run(&Request::unidirectional(vec![0], vec![1]).with_sizes_mb(vec![1]))
        .expect("run");
    let results = &report.transactions[0].results;
    assert_eq!(results.device_min, vec![Some(0.001)]);
    assert_eq!(results.peak_bandwidth, vec![1_048_576.0 / 0.001 / 1e9]);
    assert_eq!(results.avg_bandwidth, results.peak_bandwidth);
}

#[test]
fn corrupted_path_fails_validation_and_sets_exit_code() {
    let platform = SoftwarePlatform::preset(FabricPreset::Workstation).expect("preset");
    let gpu0 = platform.agents().expect("agents")[1];
    let gpu0_coarse = platform.pools(gpu0).expect("pools")[0];
    platform.corrupt_copies_into(gpu0_coarse).expect("inject");
    let session = Session::open(Box::new(platform), RunConfig::default()).expect("session");

    let mut plan = session
        .plan(&Request::unidirectional(vec![0], vec![1, 2]).validated())
        .expect("plan");
    plan.sizes = SizeList::from_bytes(vec![MIB]);
    let report = session.execute(plan).expect("run");

    assert_ne!(report.exit_code, 0);
    assert!(!report.validation_passed());
    let broken = &report.transactions[0];
    assert!(!broken.validation_passed());
    assert!(broken.results.peak_bandwidth.iter().all(|&v| units::is_failure(v)));
    assert!(report.transactions[1].validation_passed());

    let matrix = report.validation_matrix(session.catalog().agent_count()).expect("matrix");
    assert_eq!(matrix.get(0, 1), Some(&Some(false)));
    assert_eq!(matrix.get(0, 2), Some(&Some(true)));
    assert_eq!(matrix.get(1, 2), Some(&None));
}

#[test]
fn blocking_wait_mode_completes() {
    let config = RunConfig::from_lookup(|key| (key == ENV_RUN_BLOCKING).then(String::new));
    let platform = SoftwarePlatform::preset(FabricPreset::DualXgmi).expect("preset");
    let session = Session::open(Box::new(platform), config).expect("session");
    let report = session
        .run(&Request::bidirectional(vec![1, 2]).with_sizes_mb(vec![1]))
        .expect("run");
    assert_eq!(report.transactions.len(), 1);
    assert!(report.transactions[0].results.device_min[0].is_some());
}

#[test]
fn concurrent_batch_releases_everything() {
    let platform = SoftwarePlatform::preset(FabricPreset::TwoSocket).expect("preset");
    let config = RunConfig::default();
    let catalog = Catalog::discover(&platform, &config).expect("catalog");
    let reach = Reachability::build(&platform, &catalog).expect("reach");
    let pool = |agent: usize| catalog.agent(agent).expect("agent").pools[0];
    let request = Request::concurrent(vec![pool(0), pool(2), pool(1), pool(4), pool(2), pool(3)], true);
    let mut plan = TransactionBuilder::new(&catalog, &reach).build(&request).expect("plan");
    assert_eq!(plan.transactions.len(), 3);

    let mut executor = BenchmarkExecutor::new(&platform, &catalog, &config);
    executor
        .run(&request, &mut plan, &SizeList::from_bytes(vec![4096, MIB]))
        .expect("run");
    for t in &plan.transactions {
        assert_eq!(t.results.peak_bandwidth.len(), 2);
    }
    assert_eq!(platform.live_buffers().expect("buffers"), 0);
    assert_eq!(platform.live_signals().expect("signals"), 0);
}
