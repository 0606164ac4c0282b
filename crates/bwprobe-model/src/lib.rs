//! Fabric model for heterogeneous memory-pool bandwidth probing.
//!
//! This crate has **no dependencies** and **no platform access**. It is a
//! pure model of the things every probe run agrees on: which buffer sizes to
//! sweep, how a path between two agents is classified, how a PCIe bus id is
//! rendered, and how elapsed time becomes a bandwidth figure.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`device`] | Agent device class (host vs accelerator) |
//! | [`link`] | Link type codes, per-hop metadata, type/weight heuristic |
//! | [`pcie`] | Bus/device/function decoding for accelerator agents |
//! | [`sizes`] | Default and latency size ladders, MiB conversion |
//! | [`units`] | Decimal GB/s arithmetic and the validation failure sentinel |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod device;
pub mod link;
pub mod pcie;
pub mod sizes;
pub mod units;

pub use device::DeviceClass;
pub use link::{HopKind, LinkHop, LinkType};
