//! Agent device classes.

use std::fmt;

/// Class of a compute agent.
///
/// Only two classes matter to the probe: hosts own system memory and never
/// take part in a host-to-host measurement, accelerators own device memory
/// and expose device-side copy timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    /// CPU socket / NUMA node.
    Host,
    /// GPU or other DMA-capable accelerator.
    Accelerator,
}

impl DeviceClass {
    /// `true` for [`DeviceClass::Host`].
    #[must_use]
    pub const fn is_host(self) -> bool {
        matches!(self, Self::Host)
    }

    /// `true` for [`DeviceClass::Accelerator`].
    #[must_use]
    pub const fn is_accelerator(self) -> bool {
        matches!(self, Self::Accelerator)
    }

    /// Short label used in report banners.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Host => "CPU",
            Self::Accelerator => "GPU",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
