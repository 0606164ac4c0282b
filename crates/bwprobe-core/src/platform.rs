//! Platform abstraction for accelerator runtimes
//!
//! Everything the probe needs from the runtime goes through [`Platform`]:
//! agent and pool enumeration, allocation, access grants, completion
//! signals, asynchronous copies and device timestamps. Implementations use
//! interior mutability so a single instance can be shared by reference.

use crate::error::Result;
use crate::platforms::software::{FabricPreset, SoftwarePlatform};
use bwprobe_model::{DeviceClass, LinkHop};
use bwprobe_model::pcie::Bdf;
use std::fmt::Debug;

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw runtime handle
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw runtime handle
            pub const fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// Opaque runtime handle of a compute agent
    AgentHandle
);
handle!(
    /// Opaque runtime handle of a memory pool
    PoolHandle
);
handle!(
    /// Opaque runtime handle of an allocated buffer
    BufferHandle
);
handle!(
    /// Opaque runtime handle of a completion signal
    SignalHandle
);

/// Properties of one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInfo {
    /// Marketing or runtime name
    pub name: String,
    /// Host or accelerator
    pub class: DeviceClass,
    /// PCIe location (accelerators only)
    pub bdf: Option<Bdf>,
}

/// Memory segment a pool lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// Globally visible memory, the only kind the probe uses
    Global,
    /// Read-only memory
    ReadOnly,
    /// Per-work-item private memory
    Private,
    /// Work-group shared memory
    Group,
}

/// Properties of one memory pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolInfo {
    /// Segment kind
    pub segment: Segment,
    /// Runtime allocation permitted
    pub alloc_allowed: bool,
    /// Maximum allocatable size in bytes
    pub size: usize,
    /// Every agent may access allocations by default
    pub access_to_all: bool,
    /// Fine-grained (coherent) rather than coarse-grained
    pub fine_grained: bool,
    /// Usable for kernel arguments, i.e. host-visible staging
    pub kernarg: bool,
}

/// Access an agent has to a pool it does not own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAccess {
    /// Access can never be granted
    NeverAllowed,
    /// Accessible without a grant
    AllowedByDefault,
    /// Accessible after an explicit grant
    DisallowedByDefault,
}

impl PoolAccess {
    /// `true` unless access is impossible
    pub const fn is_possible(self) -> bool {
        !matches!(self, Self::NeverAllowed)
    }
}

/// Asynchronous copy submission
#[derive(Debug, Clone, Copy)]
pub struct CopyRequest<'a> {
    /// Destination buffer
    pub dst: BufferHandle,
    /// Agent the destination is copied for
    pub dst_agent: AgentHandle,
    /// Source buffer
    pub src: BufferHandle,
    /// Agent the source is copied for
    pub src_agent: AgentHandle,
    /// Bytes to move
    pub size: usize,
    /// Signals that must reach zero before the copy starts
    pub deps: &'a [SignalHandle],
    /// Signal decremented by one when the copy completes
    pub completion: SignalHandle,
}

/// Device-side timestamps of a finished copy, in platform ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyTimestamps {
    /// Tick the transfer started
    pub start: u64,
    /// Tick the transfer ended
    pub end: u64,
}

impl CopyTimestamps {
    /// Ticks between start and end
    pub const fn ticks(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }
}

/// Accelerator runtime interface
///
/// Every call may fail with [`crate::BwError::Platform`]; callers treat such
/// failures as a broken environment.
pub trait Platform: Debug + Send + Sync {
    /// Platform type for logging
    fn platform_type(&self) -> PlatformType;

    /// All agents, in the runtime's enumeration order
    ///
    /// # Errors
    ///
    /// Returns error if enumeration fails.
    fn agents(&self) -> Result<Vec<AgentHandle>>;

    /// Properties of an agent
    ///
    /// # Errors
    ///
    /// Returns error if the agent is unknown to the runtime.
    fn agent_info(&self, agent: AgentHandle) -> Result<AgentInfo>;

    /// Pools owned by an agent, in the runtime's enumeration order
    ///
    /// # Errors
    ///
    /// Returns error if the agent is unknown to the runtime.
    fn pools(&self, agent: AgentHandle) -> Result<Vec<PoolHandle>>;

    /// Properties of a pool
    ///
    /// # Errors
    ///
    /// Returns error if the pool is unknown to the runtime.
    fn pool_info(&self, pool: PoolHandle) -> Result<PoolInfo>;

    /// Access mode `agent` has to `pool`
    ///
    /// # Errors
    ///
    /// Returns error if either handle is unknown.
    fn pool_access(&self, agent: AgentHandle, pool: PoolHandle) -> Result<PoolAccess>;

    /// Hops between `agent` and `pool`; empty if there is no path
    ///
    /// # Errors
    ///
    /// Returns error if either handle is unknown.
    fn link_hops(&self, agent: AgentHandle, pool: PoolHandle) -> Result<Vec<LinkHop>>;

    /// Allocate `size` bytes from `pool`
    ///
    /// # Errors
    ///
    /// Returns error if the pool is exhausted or does not allow allocation.
    fn allocate(&self, pool: PoolHandle, size: usize) -> Result<BufferHandle>;

    /// Release a buffer
    ///
    /// # Errors
    ///
    /// Returns error if the buffer is unknown.
    fn free(&self, buffer: BufferHandle) -> Result<()>;

    /// Grant `agents` access to `buffer`
    ///
    /// # Errors
    ///
    /// Returns error if an agent can never access the buffer's pool.
    fn allow_access(&self, agents: &[AgentHandle], buffer: BufferHandle) -> Result<()>;

    /// Write host bytes into a host-accessible buffer
    ///
    /// # Errors
    ///
    /// Returns error if the range is out of bounds or the buffer is not host-visible.
    fn host_write(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> Result<()>;

    /// Read a host-accessible buffer into `out`
    ///
    /// # Errors
    ///
    /// Returns error if the range is out of bounds or the buffer is not host-visible.
    fn host_read(&self, buffer: BufferHandle, offset: usize, out: &mut [u8]) -> Result<()>;

    /// CPU copy between two host-accessible buffers
    ///
    /// # Errors
    ///
    /// Returns error if either buffer is not host-visible or too small.
    fn host_copy(&self, dst: BufferHandle, src: BufferHandle, size: usize) -> Result<()>;

    /// Create a completion signal
    ///
    /// # Errors
    ///
    /// Returns error if the runtime is out of signals.
    fn signal_create(&self, initial: i64) -> Result<SignalHandle>;

    /// Destroy a completion signal
    ///
    /// # Errors
    ///
    /// Returns error if the signal is unknown.
    fn signal_destroy(&self, signal: SignalHandle) -> Result<()>;

    /// Store a value, waking any waiters and dependent copies
    ///
    /// # Errors
    ///
    /// Returns error if the signal is unknown.
    fn signal_store(&self, signal: SignalHandle, value: i64) -> Result<()>;

    /// Current value of a signal
    ///
    /// # Errors
    ///
    /// Returns error if the signal is unknown.
    fn signal_load(&self, signal: SignalHandle) -> Result<i64>;

    /// Block the calling thread until the signal drops below `below`
    ///
    /// Never times out.
    ///
    /// # Errors
    ///
    /// Returns error if the signal is unknown.
    fn signal_wait_blocking(&self, signal: SignalHandle, below: i64) -> Result<i64>;

    /// Submit an asynchronous copy
    ///
    /// # Errors
    ///
    /// Returns error if submission fails or neither endpoint may access both buffers.
    fn async_copy(&self, request: &CopyRequest<'_>) -> Result<()>;

    /// `true` if the platform records device timestamps for copies
    fn supports_copy_profiling(&self) -> bool;

    /// Enable or disable copy timestamp collection on an agent
    ///
    /// # Errors
    ///
    /// Returns error if the agent is unknown or profiling is unsupported.
    fn set_copy_profiling(&self, agent: AgentHandle, enabled: bool) -> Result<()>;

    /// Timestamps of the last copy completed on `signal`
    ///
    /// # Errors
    ///
    /// Returns error if no profiled copy has completed on the signal.
    fn copy_timestamps(&self, agent: AgentHandle, signal: SignalHandle) -> Result<CopyTimestamps>;

    /// Device timestamp frequency in Hz
    ///
    /// # Errors
    ///
    /// Returns error if the frequency cannot be queried.
    fn timestamp_frequency(&self) -> Result<u64>;

    /// Release all runtime resources
    ///
    /// # Errors
    ///
    /// Returns error if the runtime fails to shut down cleanly.
    fn shutdown(&self) -> Result<()>;
}

/// Platform type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformType {
    /// Simulated fabric in host memory
    Software,
}

impl std::fmt::Display for PlatformType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "Software (simulated fabric)"),
        }
    }
}

/// Platform selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformSelection {
    /// Best available platform
    Auto,

    /// Software platform with the given fabric layout
    Software(FabricPreset),
}

/// Select a platform
///
/// No hardware runtime is linked into this build, so `Auto` resolves to the
/// software platform with the default fabric.
///
/// # Errors
///
/// Returns error if the selected platform cannot be initialized.
pub fn select_platform(selection: PlatformSelection) -> Result<Box<dyn Platform>> {
    match selection {
        PlatformSelection::Auto => {
            tracing::info!("No hardware runtime available, using software platform");
            Ok(Box::new(SoftwarePlatform::preset(FabricPreset::default())?))
        }
        PlatformSelection::Software(preset) => {
            tracing::info!("Using software platform ({preset})");
            Ok(Box::new(SoftwarePlatform::preset(preset)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_saturate() {
        let ts = CopyTimestamps { start: 10, end: 4 };
        assert_eq!(ts.ticks(), 0);
        assert_eq!(CopyTimestamps { start: 4, end: 10 }.ticks(), 6);
    }

    #[test]
    fn auto_selection_yields_software() {
        let platform = select_platform(PlatformSelection::Auto).unwrap();
        assert_eq!(platform.platform_type(), PlatformType::Software);
        assert!(!platform.agents().unwrap().is_empty());
    }

    #[test]
    fn never_allowed_is_impossible() {
        assert!(!PoolAccess::NeverAllowed.is_possible());
        assert!(PoolAccess::DisallowedByDefault.is_possible());
    }
}
