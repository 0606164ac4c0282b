//! PCIe bus identifiers.
//!
//! Accelerator agents report a packed BDF id:
//! `bus[15:8] | device[7:3] | function[2:0]`.

/// Decoded bus/device/function triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bdf {
    /// Bus number.
    pub bus: u8,
    /// Device number (5 bits).
    pub device: u8,
    /// Function number (3 bits).
    pub function: u8,
}

impl Bdf {
    /// Decode a packed BDF id.
    #[must_use]
    pub const fn from_packed(id: u32) -> Self {
        Self {
            bus: ((id >> 8) & 0xFF) as u8,
            device: ((id >> 3) & 0x1F) as u8,
            function: (id & 0x07) as u8,
        }
    }

    /// Pack back into the platform's 16-bit layout.
    #[must_use]
    pub const fn packed(&self) -> u32 {
        ((self.bus as u32) << 8) | (((self.device & 0x1F) as u32) << 3) | (self.function & 0x07) as u32
    }
}

impl std::fmt::Display for Bdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}
