//! Link classification between agents.
//!
//! The platform reports, for an (agent, pool) pair, the list of hops on the
//! path plus a NUMA distance per hop. Multi-hop paths are collapsed by the
//! platform into one entry that keeps the first hop's type while the
//! distances accumulate, so only single-hop paths carry a trustworthy type.

use crate::device::DeviceClass;
use std::fmt;

/// Sentinel used for hop count and weight when no path exists.
pub const NO_PATH: u32 = u32::MAX;

/// Physical kind of one hop as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    /// Host interconnect (HyperTransport, QPI, UPI, Infinity Fabric on-die).
    Host,
    /// PCI Express.
    Pcie,
    /// High-bandwidth accelerator fabric (XGMI-class).
    Xgmi,
    /// Anything else the platform reports (InfiniBand, vendor links).
    Other,
}

/// One hop on a path between an agent and a pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkHop {
    /// Reported link kind.
    pub kind: HopKind,
    /// Relative NUMA distance contributed by this hop.
    pub numa_distance: u32,
    /// Modeled bandwidth of the hop in GB/s (0 when unknown).
    pub bandwidth_gbps: f64,
}

impl LinkHop {
    /// Create a hop with unknown bandwidth.
    #[must_use]
    pub const fn new(kind: HopKind, numa_distance: u32) -> Self {
        Self {
            kind,
            numa_distance,
            bandwidth_gbps: 0.0,
        }
    }

    /// Attach a modeled bandwidth.
    #[must_use]
    pub const fn with_bandwidth(mut self, gbps: f64) -> Self {
        self.bandwidth_gbps = gbps;
        self
    }
}

/// Link type of an agent pair as shown in the link-type matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Same agent.
    SelfLink,
    /// Single PCIe-class hop touching an accelerator.
    Pcie,
    /// Single XGMI-class hop.
    Xgmi,
    /// Multi-hop or host-only path; type unknown.
    Ignored,
    /// No path.
    NoPath,
}

impl LinkType {
    /// Numeric code used by the platform's own tooling.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::SelfLink => 0x00,
            Self::Pcie => 0x01,
            Self::Xgmi => 0x02,
            Self::Ignored => 0x03,
            Self::NoPath => NO_PATH,
        }
    }

    /// Label used in matrix printouts.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pcie => "PCIE",
            Self::Xgmi => "XGMI",
            Self::SelfLink | Self::Ignored | Self::NoPath => "N/A",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify the path from `src` to a pool owned by `dst`.
///
/// `hops` is the list the platform reported; an empty list means no path.
#[must_use]
pub fn classify(src: DeviceClass, dst: DeviceClass, hops: &[LinkHop]) -> LinkType {
    match hops {
        [] => LinkType::NoPath,
        [hop] => {
            if hop.kind == HopKind::Xgmi {
                LinkType::Xgmi
            } else if src.is_accelerator() || dst.is_accelerator() {
                LinkType::Pcie
            } else {
                LinkType::Ignored
            }
        }
        _ => LinkType::Ignored,
    }
}

/// Summed NUMA distance over all hops. Lower is closer.
#[must_use]
pub fn weight(hops: &[LinkHop]) -> u32 {
    hops.iter()
        .fold(0u32, |acc, hop| acc.saturating_add(hop.numa_distance))
}

/// Bottleneck bandwidth of a path in GB/s, `None` if any hop is unknown.
#[must_use]
pub fn bottleneck_gbps(hops: &[LinkHop]) -> Option<f64> {
    if hops.is_empty() || hops.iter().any(|h| h.bandwidth_gbps <= 0.0) {
        return None;
    }
    hops.iter().map(|h| h.bandwidth_gbps).reduce(f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: DeviceClass = DeviceClass::Host;
    const GPU: DeviceClass = DeviceClass::Accelerator;

    #[test]
    fn single_xgmi_hop_is_xgmi() {
        let hops = [LinkHop::new(HopKind::Xgmi, 15)];
        assert_eq!(classify(GPU, GPU, &hops), LinkType::Xgmi);
    }

    #[test]
    fn single_non_fabric_hop_with_accelerator_is_pcie() {
        let hops = [LinkHop::new(HopKind::Pcie, 20)];
        assert_eq!(classify(HOST, GPU, &hops), LinkType::Pcie);
        assert_eq!(classify(GPU, HOST, &hops), LinkType::Pcie);
        let other = [LinkHop::new(HopKind::Other, 20)];
        assert_eq!(classify(GPU, GPU, &other), LinkType::Pcie);
    }

    #[test]
    fn host_to_host_single_hop_is_ignored() {
        let hops = [LinkHop::new(HopKind::Host, 21)];
        assert_eq!(classify(HOST, HOST, &hops), LinkType::Ignored);
    }

    #[test]
    fn multi_hop_is_ignored_even_with_fabric_first_hop() {
        let hops = [
            LinkHop::new(HopKind::Xgmi, 15),
            LinkHop::new(HopKind::Xgmi, 15),
        ];
        assert_eq!(classify(GPU, GPU, &hops), LinkType::Ignored);
        assert_eq!(weight(&hops), 30);
    }

    #[test]
    fn empty_path_is_no_path() {
        assert_eq!(classify(GPU, GPU, &[]), LinkType::NoPath);
        assert_eq!(LinkType::NoPath.code(), NO_PATH);
    }

    #[test]
    fn bottleneck_takes_slowest_hop() {
        let hops = [
            LinkHop::new(HopKind::Pcie, 20).with_bandwidth(24.0),
            LinkHop::new(HopKind::Host, 12).with_bandwidth(40.0),
        ];
        assert_eq!(bottleneck_gbps(&hops), Some(24.0));
        assert_eq!(bottleneck_gbps(&[LinkHop::new(HopKind::Pcie, 20)]), None);
    }
}
