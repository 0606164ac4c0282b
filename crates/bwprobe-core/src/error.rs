//! Error types for probe operations

use std::panic::Location;
use thiserror::Error;

/// Result type alias for probe operations
pub type Result<T> = std::result::Result<T, BwError>;

/// Errors that can occur while discovering, planning or running a probe
#[derive(Debug, Error)]
pub enum BwError {
    /// A platform runtime call failed. Always fatal.
    #[error("Platform call `{op}` failed at {location}: {reason}")]
    Platform {
        /// Name of the failing platform operation
        op: &'static str,
        /// Reason reported by the platform
        reason: String,
        /// Call site that issued the operation
        location: &'static Location<'static>,
    },

    /// Requested pool index does not exist
    #[error("Pool index {index} out of range (have {count} pools)")]
    UnknownPool {
        /// Requested index
        index: usize,
        /// Number of catalogued pools
        count: usize,
    },

    /// Requested agent index does not exist
    #[error("Agent index {index} out of range (have {count} agents)")]
    UnknownAgent {
        /// Requested index
        index: usize,
        /// Number of catalogued agents
        count: usize,
    },

    /// A pool appears twice in one copy list
    #[error("Pool {index} is listed more than once")]
    DuplicatePool {
        /// Duplicated pool index
        index: usize,
    },

    /// Request record is malformed or combines incompatible modes
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request
        reason: String,
    },

    /// Explicitly requested copy endpoints have no access path
    #[error(
        "No access path between pool {src_pool} (device {src_agent}) and pool {dst_pool} (device {dst_agent})"
    )]
    NoAccessPath {
        /// Source pool index
        src_pool: usize,
        /// Source agent index
        src_agent: usize,
        /// Destination pool index
        dst_pool: usize,
        /// Destination agent index
        dst_agent: usize,
    },

    /// Executing agent of a read/write request cannot reach the pool
    #[error("Device {agent} cannot access pool {pool}")]
    NoIoAccess {
        /// Executing agent index
        agent: usize,
        /// Pool index
        pool: usize,
    },

    /// No kernel-argument capable host pool was found during discovery
    #[error("No host staging pool available for initialization and validation")]
    NoStagingPool,

    /// A copy was issued between buffers no endpoint may access
    #[error("Access denied: {reason}")]
    AccessDenied {
        /// Which access was missing
        reason: String,
    },

    /// Operation has no implementation on this platform
    #[error("Unsupported operation: {reason}")]
    Unsupported {
        /// What is unsupported
        reason: String,
    },
}

impl BwError {
    /// Create a platform error tagged with the caller's location
    #[track_caller]
    pub fn platform(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Platform {
            op,
            reason: reason.into(),
            location: Location::caller(),
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Create an access denied error
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// `true` for broken-environment errors (platform failures, denied
    /// copies). Everything else is a topology or request error reported
    /// before any benchmark runs.
    pub const fn is_fatal_environment(&self) -> bool {
        matches!(self, Self::Platform { .. } | Self::AccessDenied { .. })
    }
}
