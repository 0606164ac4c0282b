//! Copy bandwidth and latency probing across heterogeneous memory pools.
//!
//! This crate discovers the compute agents of a node and the memory pools
//! they own, works out which agent can reach which pool, and measures
//! asynchronous copies between pools with host or device timing.
//!
//! # Pipeline
//!
//! ```text
//! Platform ─► Catalog ─► Topology (access + link matrices)
//!                            │
//!           Request ─► TransactionBuilder ─► BenchmarkExecutor ─► stats ─► BenchmarkReport
//! ```
//!
//! # Platforms
//!
//! Everything talks to the runtime through the [`Platform`] trait. The
//! [`SoftwarePlatform`] simulates a fabric in host memory with real byte
//! copies and modeled device timestamps, which is what the tests run on.
//!
//! # Quick start
//!
//! ```no_run
//! use bwprobe_core::{select_platform, PlatformSelection, Request, RunConfig, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = select_platform(PlatformSelection::Auto)?;
//! let session = Session::open(platform, RunConfig::from_env())?;
//!
//! let report = session.run(&Request::all_pairs(false))?;
//! for t in &report.transactions {
//!     println!("{:?}: {:?} GB/s", t.as_copy(), t.results.peak_bandwidth);
//! }
//! session.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod catalog;
mod config;
mod error;
pub mod executor;
pub mod matrix;
mod platform;
pub mod platforms;
pub mod request;
pub mod session;
pub mod staging;
pub mod stats;
mod timer;
pub mod topology;
pub mod transaction;
pub mod wait;

pub use catalog::{Agent, Catalog, CatalogBuilder, Pool, StagingPool};
pub use config::{
    RunConfig, WaitMode, DEFAULT_BASE_ITERATIONS, ENV_DEFAULT_RUN, ENV_ITER_CNT,
    ENV_RUN_BLOCKING, ENV_SKIP_ACCEL_COARSE_GRAINED, ENV_SKIP_HOST_FINE_GRAINED,
};
pub use error::{BwError, Result};
pub use executor::BenchmarkExecutor;
pub use matrix::Matrix;
pub use platform::{
    select_platform, AgentHandle, AgentInfo, BufferHandle, CopyRequest, CopyTimestamps, Platform,
    PlatformSelection, PlatformType, PoolAccess, PoolHandle, PoolInfo, Segment, SignalHandle,
};
pub use platforms::{FabricPreset, FabricSpec, SoftwarePlatform};
pub use request::{Request, RequestKind, SizeList};
pub use session::{BenchmarkReport, Plan, Session};
pub use timer::HostTimer;
pub use topology::{AccessClass, LinkInfo, LinkProps, Reachability, Topology};
pub use transaction::{
    CopyPayload, IoPayload, Payload, Transaction, TransactionBuilder, TransactionPlan,
    TransactionResults,
};
pub use wait::{waiter_for, BlockingWait, CompletionWait, SpinWait};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AccessClass, BenchmarkReport, BwError, Catalog, FabricPreset, Platform,
        PlatformSelection, Request, RequestKind, Result, RunConfig, Session, SizeList,
        SoftwarePlatform, Topology, Transaction, WaitMode,
    };
}
