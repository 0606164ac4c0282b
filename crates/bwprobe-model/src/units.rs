//! Bandwidth arithmetic.
//!
//! Bandwidth is reported in decimal gigabytes (10^9 bytes) per second,
//! never GiB/s.

/// Reserved time/bandwidth value standing in for a failed validation.
///
/// Anything derived from a failed sample must itself be this value.
pub const VALIDATION_FAILURE: f64 = f64::MAX;

/// Bytes per decimal gigabyte.
pub const BYTES_PER_GB: f64 = 1e9;

/// `true` if `value` is the validation failure sentinel.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn is_failure(value: f64) -> bool {
    value == VALIDATION_FAILURE
}

/// Bytes over seconds in GB/s. A sentinel time yields the sentinel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gigabytes_per_second(bytes: usize, seconds: f64) -> f64 {
    if is_failure(seconds) {
        return VALIDATION_FAILURE;
    }
    bytes as f64 / seconds / BYTES_PER_GB
}

/// Device ticks to seconds. A sentinel tick count stays the sentinel.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn ticks_to_seconds(ticks: f64, frequency_hz: u64) -> f64 {
    if is_failure(ticks) {
        return VALIDATION_FAILURE;
    }
    ticks / frequency_hz as f64
}
