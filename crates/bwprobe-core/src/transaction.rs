//! Transactions and the transaction builder
//!
//! The builder turns a checked [`Request`] into the complete list of work
//! items, or fails as a whole. Partial lists are never returned.

use crate::catalog::{Catalog, Pool};
use crate::error::{BwError, Result};
use crate::platform::{AgentHandle, PoolHandle};
use crate::request::{Request, RequestKind};
use crate::topology::Reachability;
use bwprobe_model::units;
use std::collections::{BTreeSet, HashSet};

/// Endpoints of a copy transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPayload {
    /// Source pool index
    pub src_pool: usize,
    /// Destination pool index
    pub dst_pool: usize,
    /// Source pool's agent index
    pub src_agent: usize,
    /// Destination pool's agent index
    pub dst_agent: usize,
    /// Source pool handle
    pub src_handle: PoolHandle,
    /// Destination pool handle
    pub dst_handle: PoolHandle,
    /// Source agent handle
    pub src_agent_handle: AgentHandle,
    /// Destination agent handle
    pub dst_agent_handle: AgentHandle,
    /// Copy both ways at once
    pub bidirectional: bool,
    /// Either endpoint is an accelerator, so device timestamps apply
    pub uses_accelerator: bool,
}

impl CopyPayload {
    /// Both endpoints belong to the same agent
    pub const fn is_loopback(&self) -> bool {
        self.src_agent == self.dst_agent
    }
}

/// Endpoints of a kernel read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoPayload {
    /// Pool index
    pub pool: usize,
    /// Pool handle
    pub pool_handle: PoolHandle,
    /// Executing agent index
    pub agent: usize,
    /// Executing agent handle
    pub agent_handle: AgentHandle,
}

/// What a transaction moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    /// Asynchronous copy between two pools
    Copy(CopyPayload),
    /// Kernel access of one pool by one agent
    ReadWrite(IoPayload),
}

/// Per-size result vectors, one entry per swept size
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionResults {
    /// Robust mean of host-timed samples, seconds
    pub host_avg: Vec<f64>,
    /// Minimum host-timed sample, seconds
    pub host_min: Vec<f64>,
    /// Robust mean of device-timed samples, seconds; `None` under host timing
    pub device_avg: Vec<Option<f64>>,
    /// Minimum device-timed sample, seconds; `None` under host timing
    pub device_min: Vec<Option<f64>>,
    /// Reported average time, seconds
    pub avg_time: Vec<f64>,
    /// Reported minimum time, seconds
    pub min_time: Vec<f64>,
    /// Reported average bandwidth, GB/s
    pub avg_bandwidth: Vec<f64>,
    /// Reported peak bandwidth, GB/s
    pub peak_bandwidth: Vec<f64>,
}

/// One unit of benchmark work
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Position in the plan
    pub index: usize,
    /// Request kind that produced it
    pub kind: RequestKind,
    /// Endpoints
    pub payload: Payload,
    /// Accumulated results
    pub results: TransactionResults,
}

impl Transaction {
    fn copy(index: usize, kind: RequestKind, payload: CopyPayload) -> Self {
        Self {
            index,
            kind,
            payload: Payload::Copy(payload),
            results: TransactionResults::default(),
        }
    }

    /// Copy endpoints, if this is a copy
    pub const fn as_copy(&self) -> Option<&CopyPayload> {
        match &self.payload {
            Payload::Copy(copy) => Some(copy),
            Payload::ReadWrite(_) => None,
        }
    }

    /// `false` if any size recorded the validation failure sentinel
    pub fn validation_passed(&self) -> bool {
        !self
            .results
            .avg_bandwidth
            .iter()
            .chain(&self.results.avg_time)
            .any(|&v| units::is_failure(v))
    }
}

/// Transactions plus the agents they touch
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    /// Work items in execution order
    pub transactions: Vec<Transaction>,
    /// Indices of every agent some transaction uses
    pub active_agents: BTreeSet<usize>,
}

impl TransactionPlan {
    fn push_copy(&mut self, kind: RequestKind, payload: CopyPayload) {
        self.active_agents.insert(payload.src_agent);
        self.active_agents.insert(payload.dst_agent);
        let index = self.transactions.len();
        self.transactions.push(Transaction::copy(index, kind, payload));
    }
}

/// Builds the transaction list of a request
#[derive(Debug, Clone, Copy)]
pub struct TransactionBuilder<'a> {
    catalog: &'a Catalog,
    reachability: &'a Reachability,
}

impl<'a> TransactionBuilder<'a> {
    /// Builder over a populated catalog and access matrix
    pub const fn new(catalog: &'a Catalog, reachability: &'a Reachability) -> Self {
        Self {
            catalog,
            reachability,
        }
    }

    /// Build every transaction of `request`
    ///
    /// # Errors
    ///
    /// Returns error on the first invalid index, or on a missing access path
    /// in an explicit request. Nothing is returned on failure.
    pub fn build(&self, request: &Request) -> Result<TransactionPlan> {
        let plan = match request.kind {
            RequestKind::CopyUnidirectional => {
                self.pairwise(request.kind, &request.src_pools, &request.dst_pools)?
            }
            RequestKind::CopyBidirectional => {
                self.pairwise(request.kind, &request.pools, &request.pools)?
            }
            RequestKind::AllPairsUnidirectional | RequestKind::AllPairsBidirectional => {
                let all: Vec<usize> = (0..self.catalog.pool_count()).collect();
                self.pairwise(request.kind, &all, &all)?
            }
            RequestKind::ConcurrentUnidirectional | RequestKind::ConcurrentBidirectional => {
                self.concurrent(request.kind, &request.pools)?
            }
            RequestKind::Read | RequestKind::Write => self.read_write(request.kind, &request.pools)?,
        };
        tracing::info!(
            "{}: {} transaction(s) over {} agent(s)",
            request.kind,
            plan.transactions.len(),
            plan.active_agents.len()
        );
        Ok(plan)
    }

    fn payload(src: &Pool, dst: &Pool, bidirectional: bool) -> CopyPayload {
        CopyPayload {
            src_pool: src.index,
            dst_pool: dst.index,
            src_agent: src.agent,
            dst_agent: dst.agent,
            src_handle: src.handle,
            dst_handle: dst.handle,
            src_agent_handle: src.agent_handle,
            dst_agent_handle: dst.agent_handle,
            bidirectional,
            uses_accelerator: src.class.is_accelerator() || dst.class.is_accelerator(),
        }
    }

    fn no_path(src: &Pool, dst: &Pool) -> BwError {
        BwError::NoAccessPath {
            src_pool: src.index,
            src_agent: src.agent,
            dst_pool: dst.index,
            dst_agent: dst.agent,
        }
    }

    fn pairwise(&self, kind: RequestKind, srcs: &[usize], dsts: &[usize]) -> Result<TransactionPlan> {
        let bidirectional = kind.is_bidirectional();
        let sweep = kind.is_all_pairs();
        let mut plan = TransactionPlan::default();
        let mut agent_pairs = HashSet::new();

        for &s in srcs {
            let src = self.catalog.pool(s)?;
            for &d in dsts {
                let dst = self.catalog.pool(d)?;
                if src.class.is_host() && dst.class.is_host() {
                    continue;
                }
                if bidirectional {
                    if src.agent == dst.agent {
                        continue;
                    }
                    let key = (src.agent.min(dst.agent), src.agent.max(dst.agent));
                    if agent_pairs.contains(&key) {
                        continue;
                    }
                }

                if !self.reachability.class(src.agent, dst.agent)?.has_path() {
                    if sweep {
                        tracing::debug!("Skipping pool {s} -> pool {d}: no access path");
                        continue;
                    }
                    tracing::error!("No access path between pool {s} and pool {d}");
                    return Err(Self::no_path(src, dst));
                }

                if bidirectional {
                    agent_pairs.insert((src.agent.min(dst.agent), src.agent.max(dst.agent)));
                }
                plan.push_copy(kind, Self::payload(src, dst, bidirectional));
            }
        }
        Ok(plan)
    }

    fn concurrent(&self, kind: RequestKind, pools: &[usize]) -> Result<TransactionPlan> {
        let bidirectional = kind.is_bidirectional();
        let mut plan = TransactionPlan::default();
        let mut seen = HashSet::new();

        for pair in pools.chunks_exact(2) {
            let (s, d) = (pair[0], pair[1]);
            let src = self.catalog.pool(s)?;
            let dst = self.catalog.pool(d)?;
            if src.class.is_host() && dst.class.is_host() {
                tracing::warn!("Skipping host-to-host pair ({s}, {d})");
                continue;
            }
            if seen.contains(&(s, d)) {
                continue;
            }
            if bidirectional && (src.agent == dst.agent || seen.contains(&(d, s))) {
                continue;
            }
            if !self.reachability.class(src.agent, dst.agent)?.has_path() {
                tracing::error!("No access path between pool {s} and pool {d}");
                return Err(Self::no_path(src, dst));
            }
            seen.insert((s, d));
            plan.push_copy(kind, Self::payload(src, dst, bidirectional));
        }
        Ok(plan)
    }

    fn read_write(&self, kind: RequestKind, pairs: &[usize]) -> Result<TransactionPlan> {
        let mut plan = TransactionPlan::default();
        for pair in pairs.chunks_exact(2) {
            let pool = self.catalog.pool(pair[0])?;
            let agent = self.catalog.agent(pair[1])?;
            if !self.reachability.can_access(agent.index, pool.agent)? {
                tracing::error!("Agent {} cannot access pool {}", agent.index, pool.index);
                return Err(BwError::NoIoAccess {
                    agent: agent.index,
                    pool: pool.index,
                });
            }
            plan.active_agents.insert(agent.index);
            plan.active_agents.insert(pool.agent);
            let index = plan.transactions.len();
            plan.transactions.push(Transaction {
                index,
                kind,
                payload: Payload::ReadWrite(IoPayload {
                    pool: pool.index,
                    pool_handle: pool.handle,
                    agent: agent.index,
                    agent_handle: agent.handle,
                }),
                results: TransactionResults::default(),
            });
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::platforms::{FabricPreset, SoftwarePlatform};
    use crate::topology::Reachability;

    fn setup(preset: FabricPreset) -> (Catalog, Reachability) {
        let platform = SoftwarePlatform::preset(preset).unwrap();
        let catalog = Catalog::discover(&platform, &RunConfig::default()).unwrap();
        let reach = Reachability::build(&platform, &catalog).unwrap();
        (catalog, reach)
    }

    fn endpoints(plan: &TransactionPlan) -> Vec<(usize, usize)> {
        plan.transactions
            .iter()
            .filter_map(Transaction::as_copy)
            .map(|c| (c.src_agent, c.dst_agent))
            .collect()
    }

    #[test]
    fn all_pairs_bidirectional_has_one_transaction_per_agent_pair() {
        let (catalog, reach) = setup(FabricPreset::Workstation);
        let plan = TransactionBuilder::new(&catalog, &reach)
            .build(&Request::all_pairs(true))
            .unwrap();
        assert_eq!(endpoints(&plan), vec![(0, 1), (0, 2), (1, 2)]);
        assert!(plan.transactions.iter().all(|t| t.as_copy().unwrap().bidirectional));
        assert_eq!(plan.active_agents.len(), 3);
    }

    #[test]
    fn all_pairs_unidirectional_skips_host_to_host_only() {
        let (catalog, reach) = setup(FabricPreset::TwoSocket);
        let plan = TransactionBuilder::new(&catalog, &reach)
            .build(&Request::all_pairs(false))
            .unwrap();
        for t in &plan.transactions {
            let c = t.as_copy().unwrap();
            assert!(c.uses_accelerator);
            assert!(reach.class(c.src_agent, c.dst_agent).unwrap().has_path());
        }
        // loopback copies stay in
        assert!(plan.transactions.iter().any(|t| t.as_copy().unwrap().is_loopback()));
        // gpu0 <-> gpu3 is unreachable and silently dropped
        assert!(!endpoints(&plan).contains(&(2, 5)));
    }

    #[test]
    fn explicit_unreachable_pair_fails_the_build() {
        let (catalog, reach) = setup(FabricPreset::TwoSocket);
        let gpu0 = catalog.agent(2).unwrap().pools[0];
        let gpu3 = catalog.agent(5).unwrap().pools[0];
        let err = TransactionBuilder::new(&catalog, &reach)
            .build(&Request::unidirectional(vec![gpu0], vec![gpu3]))
            .unwrap_err();
        assert!(matches!(err, BwError::NoAccessPath { src_agent: 2, dst_agent: 5, .. }));
    }

    #[test]
    fn explicit_bidirectional_dedupes_mirrors() {
        let (catalog, reach) = setup(FabricPreset::Workstation);
        let plan = TransactionBuilder::new(&catalog, &reach)
            .build(&Request::bidirectional(vec![2, 0, 1]))
            .unwrap();
        let mut pairs: Vec<_> = endpoints(&plan)
            .into_iter()
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect();
        pairs.sort_unstable();
        assert_eq!(pairs, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn concurrent_pairs_are_consecutive() {
        let (catalog, reach) = setup(FabricPreset::Workstation);
        let plan = TransactionBuilder::new(&catalog, &reach)
            .build(&Request::concurrent(vec![0, 1, 1, 2, 0, 1, 2, 1], true))
            .unwrap();
        // (0,1) repeated and (2,1) mirrors (1,2)
        assert_eq!(endpoints(&plan), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn read_write_requires_access() {
        let (catalog, reach) = setup(FabricPreset::TwoSocket);
        let builder = TransactionBuilder::new(&catalog, &reach);
        let gpu1_pool = catalog.agent(3).unwrap().pools[0];
        let plan = builder.build(&Request::read(vec![gpu1_pool, 3])).unwrap();
        assert!(matches!(plan.transactions[0].payload, Payload::ReadWrite(_)));
        let err = builder.build(&Request::write(vec![gpu1_pool, 4])).unwrap_err();
        assert!(matches!(err, BwError::NoIoAccess { agent: 4, .. }));
    }

    #[test]
    fn sentinel_fails_validation() {
        let (catalog, reach) = setup(FabricPreset::Workstation);
        let mut plan = TransactionBuilder::new(&catalog, &reach)
            .build(&Request::unidirectional(vec![0], vec![1]))
            .unwrap();
        let t = &mut plan.transactions[0];
        t.results.avg_bandwidth = vec![3.5, 4.0];
        assert!(t.validation_passed());
        t.results.avg_bandwidth.push(units::VALIDATION_FAILURE);
        assert!(!t.validation_passed());
    }
}
