//! Platform implementations
//!
//! - **Software**: simulated fabric with real host-memory buffers and modeled
//!   device timestamps. Used for CI and for exercising every probe mode
//!   without an accelerator.

pub mod software;

pub use software::{FabricPreset, FabricSpec, SoftwarePlatform};
