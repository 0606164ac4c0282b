//! Benchmark requests
//!
//! A [`Request`] is the fully resolved record handed over by the argument
//! parser. It is checked twice before anything runs: once for mode
//! combinations that make no sense together, once against the catalog for
//! index validity.

use crate::catalog::Catalog;
use crate::config::RunConfig;
use crate::error::{BwError, Result};
use bwprobe_model::sizes::{self, LATENCY_LADDER, LATENCY_SWEEP_SIZE, SIZE_LADDER, SWEEP_SIZE};
use std::collections::HashSet;
use std::fmt;

/// Kind of benchmark requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Kernel read of a pool by an agent
    Read,
    /// Kernel write of a pool by an agent
    Write,
    /// Copies from every source pool to every destination pool
    CopyUnidirectional,
    /// Copies in both directions between listed pools
    CopyBidirectional,
    /// Unidirectional copies between every pool pair
    AllPairsUnidirectional,
    /// Bidirectional copies between every agent pair
    AllPairsBidirectional,
    /// Consecutive pool pairs copied concurrently, one direction
    ConcurrentUnidirectional,
    /// Consecutive pool pairs copied concurrently, both directions
    ConcurrentBidirectional,
}

impl RequestKind {
    /// Both directions are copied
    pub const fn is_bidirectional(self) -> bool {
        matches!(
            self,
            Self::CopyBidirectional | Self::AllPairsBidirectional | Self::ConcurrentBidirectional
        )
    }

    /// Pool lists come from the catalog, unreachable pairs are skipped
    pub const fn is_all_pairs(self) -> bool {
        matches!(self, Self::AllPairsUnidirectional | Self::AllPairsBidirectional)
    }

    /// Transactions run as one concurrent batch
    pub const fn is_concurrent(self) -> bool {
        matches!(
            self,
            Self::ConcurrentUnidirectional | Self::ConcurrentBidirectional
        )
    }

    /// Kernel-driven read or write
    pub const fn is_read_write(self) -> bool {
        matches!(self, Self::Read | Self::Write)
    }

    /// Human readable label
    pub const fn label(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
            Self::CopyUnidirectional => "Unidirectional copy",
            Self::CopyBidirectional => "Bidirectional copy",
            Self::AllPairsUnidirectional => "All-pairs unidirectional copy",
            Self::AllPairsBidirectional => "All-pairs bidirectional copy",
            Self::ConcurrentUnidirectional => "Concurrent unidirectional copy",
            Self::ConcurrentBidirectional => "Concurrent bidirectional copy",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A resolved benchmark request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// What to run
    pub kind: RequestKind,

    /// Source pools of a unidirectional copy
    pub src_pools: Vec<usize>,

    /// Destination pools of a unidirectional copy
    pub dst_pools: Vec<usize>,

    /// Pools of a bidirectional copy, flat pairs of a concurrent copy, or
    /// flat `(pool, agent)` pairs of a read/write
    pub pools: Vec<usize>,

    /// User sizes in MiB; empty selects the default ladder
    pub sizes_mb: Vec<usize>,

    /// Base iteration count override
    pub iterations: Option<u32>,

    /// Byte-compare every destination after the copy
    pub validate: bool,

    /// Sweep the latency ladder and report times
    pub latency: bool,

    /// Use host timing even when device timestamps exist
    pub host_time: bool,

    /// Fill value for source buffers; `None` writes a generated sequence
    pub init_value: Option<u8>,
}

impl Request {
    fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            src_pools: Vec::new(),
            dst_pools: Vec::new(),
            pools: Vec::new(),
            sizes_mb: Vec::new(),
            iterations: None,
            validate: false,
            latency: false,
            host_time: false,
            init_value: None,
        }
    }

    /// Copy every `src` pool to every `dst` pool
    pub fn unidirectional(src: Vec<usize>, dst: Vec<usize>) -> Self {
        Self {
            src_pools: src,
            dst_pools: dst,
            ..Self::new(RequestKind::CopyUnidirectional)
        }
    }

    /// Copy both ways between every pair of `pools`
    pub fn bidirectional(pools: Vec<usize>) -> Self {
        Self {
            pools,
            ..Self::new(RequestKind::CopyBidirectional)
        }
    }

    /// Sweep every reachable pool pair
    pub fn all_pairs(bidirectional: bool) -> Self {
        Self::new(if bidirectional {
            RequestKind::AllPairsBidirectional
        } else {
            RequestKind::AllPairsUnidirectional
        })
    }

    /// Run consecutive pairs of `pools` as one concurrent batch
    pub fn concurrent(pools: Vec<usize>, bidirectional: bool) -> Self {
        Self {
            pools,
            ..Self::new(if bidirectional {
                RequestKind::ConcurrentBidirectional
            } else {
                RequestKind::ConcurrentUnidirectional
            })
        }
    }

    /// Kernel read of flat `(pool, agent)` pairs
    pub fn read(pairs: Vec<usize>) -> Self {
        Self {
            pools: pairs,
            ..Self::new(RequestKind::Read)
        }
    }

    /// Kernel write of flat `(pool, agent)` pairs
    pub fn write(pairs: Vec<usize>) -> Self {
        Self {
            pools: pairs,
            ..Self::new(RequestKind::Write)
        }
    }

    /// Sweep these sizes (MiB) instead of the default ladder
    #[must_use]
    pub fn with_sizes_mb(mut self, sizes: Vec<usize>) -> Self {
        self.sizes_mb = sizes;
        self
    }

    /// Override the base iteration count
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = Some(iterations);
        self
    }

    /// Validate destination contents
    #[must_use]
    pub fn validated(mut self) -> Self {
        self.validate = true;
        self
    }

    /// Measure latency instead of bandwidth
    #[must_use]
    pub fn with_latency(mut self) -> Self {
        self.latency = true;
        self
    }

    /// Force host timing
    #[must_use]
    pub fn with_host_time(mut self) -> Self {
        self.host_time = true;
        self
    }

    /// Fill source buffers with `value`
    #[must_use]
    pub fn with_init_value(mut self, value: u8) -> Self {
        self.init_value = Some(value);
        self
    }

    /// Base iteration count: request override, else the run configuration
    pub fn base_iterations(&self, config: &RunConfig) -> u32 {
        self.iterations.unwrap_or(config.base_iterations).max(1)
    }

    /// Reject mode combinations that cannot be honoured together
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` naming the offending combination.
    pub fn check_modes(&self) -> Result<()> {
        let sized = !self.sizes_mb.is_empty();
        if sized && self.kind.is_all_pairs() {
            return Err(BwError::invalid_request(
                "sizes cannot be given for an all-pairs sweep",
            ));
        }
        if self.latency {
            if self.kind != RequestKind::CopyUnidirectional {
                return Err(BwError::invalid_request(format!(
                    "latency applies to explicit unidirectional copies, not {}",
                    self.kind
                )));
            }
            if sized || self.host_time || self.validate {
                return Err(BwError::invalid_request(
                    "latency cannot be combined with sizes, host timing or validation",
                ));
            }
        }
        if self.validate && (sized || self.host_time) {
            return Err(BwError::invalid_request(
                "validation cannot be combined with sizes or host timing",
            ));
        }
        Ok(())
    }

    /// Check every index against the catalog
    ///
    /// # Errors
    ///
    /// Returns `UnknownPool`, `UnknownAgent`, `DuplicatePool` or
    /// `InvalidRequest` for the first problem found.
    pub fn validate_indices(&self, catalog: &Catalog) -> Result<()> {
        match self.kind {
            RequestKind::CopyUnidirectional => {
                if self.src_pools.is_empty() || self.dst_pools.is_empty() {
                    return Err(BwError::invalid_request(
                        "unidirectional copy needs source and destination pools",
                    ));
                }
                check_copy_list(&self.src_pools, catalog)?;
                check_copy_list(&self.dst_pools, catalog)
            }
            RequestKind::CopyBidirectional => {
                if self.pools.is_empty() {
                    return Err(BwError::invalid_request("bidirectional copy needs pools"));
                }
                check_copy_list(&self.pools, catalog)
            }
            RequestKind::AllPairsUnidirectional | RequestKind::AllPairsBidirectional => Ok(()),
            RequestKind::ConcurrentUnidirectional | RequestKind::ConcurrentBidirectional => {
                check_pairs(&self.pools, "concurrent copy")?;
                for &pool in &self.pools {
                    catalog.pool(pool)?;
                }
                Ok(())
            }
            RequestKind::Read | RequestKind::Write => {
                check_pairs(&self.pools, "read/write")?;
                for pair in self.pools.chunks_exact(2) {
                    catalog.pool(pair[0])?;
                    catalog.agent(pair[1])?;
                }
                Ok(())
            }
        }
    }
}

fn check_pairs(list: &[usize], what: &str) -> Result<()> {
    if list.is_empty() || list.len() % 2 != 0 {
        return Err(BwError::invalid_request(format!(
            "{what} needs a non-empty list of pairs, got {} entries",
            list.len()
        )));
    }
    Ok(())
}

fn check_copy_list(list: &[usize], catalog: &Catalog) -> Result<()> {
    if list.len() > catalog.pool_count() {
        return Err(BwError::invalid_request(format!(
            "{} pools listed but only {} exist",
            list.len(),
            catalog.pool_count()
        )));
    }
    let mut seen = HashSet::new();
    for &pool in list {
        catalog.pool(pool)?;
        if !seen.insert(pool) {
            return Err(BwError::DuplicatePool { index: pool });
        }
    }
    Ok(())
}

/// Buffer sizes to sweep, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeList(Vec<usize>);

impl SizeList {
    /// Sizes for a request: user MiB values, else the default for its kind
    pub fn for_request(request: &Request) -> Self {
        if !request.sizes_mb.is_empty() {
            return Self::from_mib(&request.sizes_mb);
        }
        let defaults: &[usize] = match request.kind {
            RequestKind::AllPairsUnidirectional if request.latency => &[LATENCY_SWEEP_SIZE],
            RequestKind::AllPairsUnidirectional | RequestKind::AllPairsBidirectional => {
                &[SWEEP_SIZE]
            }
            RequestKind::CopyUnidirectional if request.latency => &LATENCY_LADDER,
            RequestKind::CopyUnidirectional | RequestKind::CopyBidirectional
                if request.validate =>
            {
                &[SWEEP_SIZE]
            }
            _ => &SIZE_LADDER,
        };
        Self::from_bytes(defaults.to_vec())
    }

    /// Sizes given in MiB
    pub fn from_mib(mib: &[usize]) -> Self {
        Self::from_bytes(mib.iter().map(|&m| sizes::mib_to_bytes(m)).collect())
    }

    /// Sizes given in bytes
    pub fn from_bytes(mut bytes: Vec<usize>) -> Self {
        bytes.sort_unstable();
        Self(bytes)
    }

    /// Sizes as a slice
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Number of sizes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if there is nothing to sweep
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Largest size, the one buffers are allocated for
    pub fn max(&self) -> usize {
        self.0.last().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{FabricPreset, SoftwarePlatform};
    use bwprobe_model::sizes::MIB;

    fn catalog() -> Catalog {
        let platform = SoftwarePlatform::preset(FabricPreset::Workstation).unwrap();
        Catalog::discover(&platform, &RunConfig::default()).unwrap()
    }

    #[test]
    fn user_sizes_are_sorted_and_scaled() {
        let request = Request::unidirectional(vec![0], vec![1]).with_sizes_mb(vec![4, 1, 2]);
        let sizes = SizeList::for_request(&request);
        assert_eq!(sizes.as_slice(), &[MIB, 2 * MIB, 4 * MIB]);
        for (&bytes, mb) in sizes.as_slice().iter().zip([1, 2, 4]) {
            assert_eq!(bytes, mb * 1_048_576);
        }
        assert_eq!(sizes.max(), 4 * MIB);
    }

    #[test]
    fn default_sizes_per_kind() {
        let full = SizeList::for_request(&Request::unidirectional(vec![0], vec![1]));
        assert_eq!(full.as_slice(), &SIZE_LADDER);
        let latency = SizeList::for_request(&Request::unidirectional(vec![0], vec![1]).with_latency());
        assert_eq!(latency.as_slice(), &LATENCY_LADDER);
        let validated = SizeList::for_request(&Request::bidirectional(vec![0, 1]).validated());
        assert_eq!(validated.as_slice(), &[SWEEP_SIZE]);
        let sweep = SizeList::for_request(&Request::all_pairs(true));
        assert_eq!(sweep.as_slice(), &[SWEEP_SIZE]);
        let concurrent = SizeList::for_request(&Request::concurrent(vec![0, 1], false));
        assert_eq!(concurrent.len(), SIZE_LADDER.len());
    }

    #[test]
    fn incompatible_modes_are_rejected() {
        let bad = [
            Request::all_pairs(false).with_sizes_mb(vec![1]),
            Request::bidirectional(vec![0, 1]).with_latency(),
            Request::all_pairs(true).with_latency(),
            Request::unidirectional(vec![0], vec![1]).with_latency().with_host_time(),
            Request::unidirectional(vec![0], vec![1]).with_latency().validated(),
            Request::unidirectional(vec![0], vec![1]).validated().with_sizes_mb(vec![2]),
            Request::unidirectional(vec![0], vec![1]).validated().with_host_time(),
        ];
        for request in bad {
            assert!(
                matches!(request.check_modes(), Err(BwError::InvalidRequest { .. })),
                "{request:?}"
            );
        }
        assert!(Request::unidirectional(vec![0], vec![1]).with_latency().check_modes().is_ok());
        assert!(Request::all_pairs(false).validated().check_modes().is_ok());
    }

    #[test]
    fn copy_lists_are_checked() {
        let catalog = catalog();
        assert!(Request::unidirectional(vec![0], vec![1, 2]).validate_indices(&catalog).is_ok());
        assert!(matches!(
            Request::unidirectional(vec![0], vec![7]).validate_indices(&catalog),
            Err(BwError::UnknownPool { index: 7, .. })
        ));
        assert!(matches!(
            Request::bidirectional(vec![1, 1]).validate_indices(&catalog),
            Err(BwError::DuplicatePool { index: 1 })
        ));
        assert!(matches!(
            Request::bidirectional(vec![0, 1, 2, 0]).validate_indices(&catalog),
            Err(BwError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn pair_lists_are_checked() {
        let catalog = catalog();
        assert!(Request::read(vec![1, 0]).validate_indices(&catalog).is_ok());
        assert!(Request::write(vec![1]).validate_indices(&catalog).is_err());
        assert!(matches!(
            Request::read(vec![1, 5]).validate_indices(&catalog),
            Err(BwError::UnknownAgent { index: 5, .. })
        ));
        assert!(Request::concurrent(vec![0, 1, 1, 2], false)
            .validate_indices(&catalog)
            .is_ok());
        assert!(Request::concurrent(vec![0, 1, 2], true)
            .validate_indices(&catalog)
            .is_err());
    }

    #[test]
    fn base_iterations_prefers_request() {
        let config = RunConfig::default();
        let request = Request::all_pairs(false);
        assert_eq!(request.base_iterations(&config), config.base_iterations);
        assert_eq!(request.with_iterations(20).base_iterations(&config), 20);
    }
}
