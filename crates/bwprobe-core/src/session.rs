//! Probe session
//!
//! A [`Session`] owns the platform for the length of a run. It discovers
//! the catalog and builds the topology once, then plans and executes any
//! number of requests against them.

use crate::catalog::Catalog;
use crate::config::RunConfig;
use crate::error::Result;
use crate::executor::BenchmarkExecutor;
use crate::matrix::Matrix;
use crate::platform::Platform;
use crate::request::{Request, RequestKind, SizeList};
use crate::topology::Topology;
use crate::transaction::{Transaction, TransactionBuilder, TransactionPlan};
use std::collections::BTreeSet;

/// A checked request with its transactions and sizes
#[derive(Debug, Clone)]
pub struct Plan {
    /// The request as given
    pub request: Request,
    /// Work items and active agents
    pub transactions: TransactionPlan,
    /// Sizes to sweep
    pub sizes: SizeList,
}

/// Outcome of one executed request
#[derive(Debug, Clone)]
pub struct BenchmarkReport {
    /// What ran
    pub kind: RequestKind,
    /// Latency sweep rather than bandwidth
    pub latency: bool,
    /// Validation was requested
    pub validate: bool,
    /// Swept sizes, in bytes
    pub sizes: SizeList,
    /// Completed transactions
    pub transactions: Vec<Transaction>,
    /// Agents used by some transaction
    pub active_agents: BTreeSet<usize>,
    /// Print the version, device and topology header before the results
    pub show_topology: bool,
    /// First validation mismatch, zero if none
    pub exit_code: i32,
}

impl BenchmarkReport {
    /// `true` if no transaction recorded a validation failure
    pub fn validation_passed(&self) -> bool {
        self.transactions.iter().all(Transaction::validation_passed)
    }

    /// Agent × agent figure of the first size, for all-pairs sweeps
    ///
    /// A later transaction between the same agents overwrites an earlier
    /// one. Bidirectional sweeps fill both cells of a pair.
    pub fn bandwidth_matrix(&self, agent_count: usize, peak: bool) -> Option<Matrix<Option<f64>>> {
        if !self.kind.is_all_pairs() {
            return None;
        }
        let mut matrix = Matrix::filled(agent_count, None);
        for transaction in &self.transactions {
            let Some(copy) = transaction.as_copy() else {
                continue;
            };
            let figures = if peak {
                &transaction.results.peak_bandwidth
            } else {
                &transaction.results.avg_bandwidth
            };
            let Some(&value) = figures.first() else {
                continue;
            };
            matrix.set(copy.src_agent, copy.dst_agent, Some(value)).ok()?;
            if self.kind.is_bidirectional() {
                matrix.set(copy.dst_agent, copy.src_agent, Some(value)).ok()?;
            }
        }
        Some(matrix)
    }

    /// Agent × agent pass/fail of a validated copy run
    pub fn validation_matrix(&self, agent_count: usize) -> Option<Matrix<Option<bool>>> {
        if !self.validate {
            return None;
        }
        let mut matrix = Matrix::filled(agent_count, None);
        for transaction in &self.transactions {
            let Some(copy) = transaction.as_copy() else {
                continue;
            };
            let passed = transaction.validation_passed();
            let merged = matrix
                .get(copy.src_agent, copy.dst_agent)
                .copied()
                .flatten()
                .map_or(passed, |earlier| earlier && passed);
            matrix.set(copy.src_agent, copy.dst_agent, Some(merged)).ok()?;
            if copy.bidirectional {
                matrix.set(copy.dst_agent, copy.src_agent, Some(merged)).ok()?;
            }
        }
        Some(matrix)
    }
}

/// Platform, catalog and topology of one run
#[derive(Debug)]
pub struct Session {
    platform: Box<dyn Platform>,
    config: RunConfig,
    catalog: Catalog,
    topology: Topology,
}

impl Session {
    /// Discover agents and pools and build both matrices
    ///
    /// # Errors
    ///
    /// Returns error if discovery or a topology query fails.
    pub fn open(platform: Box<dyn Platform>, config: RunConfig) -> Result<Self> {
        tracing::info!("Opening session on the {} platform", platform.platform_type());
        let catalog = Catalog::discover(platform.as_ref(), &config)?;
        let topology = Topology::build(platform.as_ref(), &catalog)?;
        Ok(Self {
            platform,
            config,
            catalog,
            topology,
        })
    }

    /// Discovered agents and pools
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Access and link matrices
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Run configuration
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Underlying platform
    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Check `request` and build its transactions
    ///
    /// # Errors
    ///
    /// Returns error on an invalid mode combination, an invalid index, or a
    /// missing access path in an explicit request.
    pub fn plan(&self, request: &Request) -> Result<Plan> {
        request.check_modes()?;
        request.validate_indices(&self.catalog)?;
        let transactions =
            TransactionBuilder::new(&self.catalog, &self.topology.reachability).build(request)?;
        let sizes = SizeList::for_request(request);
        Ok(Plan {
            request: request.clone(),
            transactions,
            sizes,
        })
    }

    /// Execute a plan
    ///
    /// # Errors
    ///
    /// Returns the first platform failure.
    pub fn execute(&self, plan: Plan) -> Result<BenchmarkReport> {
        let Plan {
            request,
            mut transactions,
            sizes,
        } = plan;
        let mut executor = BenchmarkExecutor::new(self.platform.as_ref(), &self.catalog, &self.config);
        executor.run(&request, &mut transactions, &sizes)?;

        let show_topology =
            !(self.config.default_run && request.kind == RequestKind::AllPairsBidirectional);
        Ok(BenchmarkReport {
            kind: request.kind,
            latency: request.latency,
            validate: request.validate,
            sizes,
            transactions: transactions.transactions,
            active_agents: transactions.active_agents,
            show_topology,
            exit_code: executor.exit_code(),
        })
    }

    /// Plan and execute `request`
    ///
    /// # Errors
    ///
    /// Returns error if planning or execution fails.
    pub fn run(&self, request: &Request) -> Result<BenchmarkReport> {
        let plan = self.plan(request)?;
        self.execute(plan)
    }

    /// Shut the platform down
    ///
    /// # Errors
    ///
    /// Returns error if the platform fails to shut down.
    pub fn close(self) -> Result<()> {
        self.platform.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{FabricPreset, SoftwarePlatform};

    fn session(preset: FabricPreset, config: RunConfig) -> Session {
        let platform = SoftwarePlatform::preset(preset).unwrap();
        Session::open(Box::new(platform), config).unwrap()
    }

    #[test]
    fn plan_rejects_bad_modes_before_building() {
        let s = session(FabricPreset::Workstation, RunConfig::default());
        assert!(s.plan(&Request::all_pairs(true).with_sizes_mb(vec![1])).is_err());
        assert!(s.plan(&Request::unidirectional(vec![0], vec![9])).is_err());
    }

    #[test]
    fn all_pairs_sweep_fills_agent_matrix() {
        let s = session(FabricPreset::Workstation, RunConfig::default());
        let mut plan = s.plan(&Request::all_pairs(true)).unwrap();
        plan.sizes = SizeList::from_bytes(vec![1 << 20]);
        let report = s.execute(plan).unwrap();
        assert!(report.show_topology);
        let matrix = report.bandwidth_matrix(s.catalog().agent_count(), true).unwrap();
        assert!(matrix.get(0, 0).unwrap().is_none());
        for (i, j) in [(0, 1), (1, 0), (0, 2), (2, 0), (1, 2), (2, 1)] {
            assert!(matrix.get(i, j).unwrap().is_some(), "({i}, {j})");
        }
        assert!(report.validation_matrix(3).is_none());
        s.close().unwrap();
    }

    #[test]
    fn default_run_hides_second_header() {
        let s = session(
            FabricPreset::Workstation,
            RunConfig::default().with_default_run(true),
        );
        let mut plan = s.plan(&Request::all_pairs(true)).unwrap();
        plan.sizes = SizeList::from_bytes(vec![4096]);
        assert!(!s.execute(plan).unwrap().show_topology);
    }
}
