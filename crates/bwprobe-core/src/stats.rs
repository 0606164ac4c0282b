//! Sample reduction and bandwidth
//!
//! Raw per-iteration samples are reduced to a minimum and a robust mean,
//! then turned into GB/s. A validation failure at a size replaces every
//! figure for that size with [`VALIDATION_FAILURE`].

use crate::platform::CopyTimestamps;
use crate::transaction::{CopyPayload, TransactionResults};
use bwprobe_model::units::{self, VALIDATION_FAILURE};

/// Extra iterations, relative to the base count, run so outliers can be trimmed
const OUTLIER_PADDING: f64 = 1.2;

/// Share of the base count trimmed from the low end
const OUTLIER_TRIM: f64 = 0.1;

/// Iterations to run per size
///
/// Validation runs once. Otherwise the base count is padded by a fifth,
/// plus one warm-up iteration, saturating at `u32::MAX`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn iteration_count(base: u32, validate: bool) -> u32 {
    if validate {
        1
    } else {
        // float-to-int `as` saturates, so only the warm-up add can overflow
        ((f64::from(base) * OUTLIER_PADDING) as u32).saturating_add(1)
    }
}

fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Smallest sample
#[must_use]
pub fn min_time(samples: &[f64]) -> Option<f64> {
    sorted(samples).first().copied()
}

/// Mean after trimming warm-up and low outliers
///
/// Sorted ascending, the lowest sample is dropped, then the lowest
/// `floor(0.1 * base)`, and only the first `base` of the rest are kept.
/// If nothing survives the mean of all samples is used.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn robust_mean(samples: &[f64], base: u32) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let all = sorted(samples);
    let trim = 1 + (f64::from(base) * OUTLIER_TRIM) as usize;
    let kept: Vec<f64> = all.iter().skip(trim).take(base as usize).copied().collect();
    let pool = if kept.is_empty() { &all } else { &kept };
    Some(pool.iter().sum::<f64>() / pool.len() as f64)
}

/// Device ticks spent by a copy, or by both directions of a bidirectional copy
///
/// Two directions count as the union of their intervals. If one direction
/// ended strictly before the other started, the idle gap between them is
/// not counted.
#[must_use]
pub fn device_copy_window(fwd: CopyTimestamps, rev: Option<CopyTimestamps>) -> u64 {
    let Some(rev) = rev else {
        return fwd.ticks();
    };
    let start = fwd.start.min(rev.start);
    let end = fwd.end.max(rev.end);
    let gap = if fwd.end < rev.start {
        rev.start - fwd.end
    } else if rev.end < fwd.start {
        fwd.start - rev.end
    } else {
        0
    };
    end.saturating_sub(start).saturating_sub(gap)
}

/// Bytes a copy moves per iteration
///
/// Doubled for bidirectional copies, doubled again when both pools belong
/// to one agent since that traffic crosses its link both ways.
#[must_use]
pub fn transferred_bytes(size: usize, copy: &CopyPayload) -> usize {
    let mut bytes = size;
    if copy.bidirectional {
        bytes = bytes.saturating_mul(2);
    }
    if copy.is_loopback() {
        bytes = bytes.saturating_mul(2);
    }
    bytes
}

/// Raw samples of one transaction at one size
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizeSamples {
    /// Host wall-clock times, seconds
    pub host: Vec<f64>,
    /// Device times, ticks
    pub device_ticks: Vec<f64>,
    /// Some iteration failed validation
    pub failed: bool,
}

/// How device ticks become seconds, if device timing is in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSource {
    /// Host wall clock
    Host,
    /// Device timestamps at the given frequency
    Device {
        /// Timestamp frequency, Hz
        frequency_hz: u64,
    },
}

/// Reduce one size's samples and append to `results`
#[allow(clippy::cast_precision_loss)]
pub fn reduce_copy_results(
    results: &mut TransactionResults,
    copy: &CopyPayload,
    size: usize,
    samples: &SizeSamples,
    base: u32,
    source: TimeSource,
) {
    if samples.failed {
        tracing::warn!(
            "Validation failed for pool {} -> pool {} at {size} bytes",
            copy.src_pool,
            copy.dst_pool
        );
        results.host_avg.push(VALIDATION_FAILURE);
        results.host_min.push(VALIDATION_FAILURE);
        if let TimeSource::Device { .. } = source {
            results.device_avg.push(Some(VALIDATION_FAILURE));
            results.device_min.push(Some(VALIDATION_FAILURE));
        } else {
            results.device_avg.push(None);
            results.device_min.push(None);
        }
        results.avg_time.push(VALIDATION_FAILURE);
        results.min_time.push(VALIDATION_FAILURE);
        results.avg_bandwidth.push(VALIDATION_FAILURE);
        results.peak_bandwidth.push(VALIDATION_FAILURE);
        return;
    }

    let host_avg = robust_mean(&samples.host, base).unwrap_or(VALIDATION_FAILURE);
    let host_min = min_time(&samples.host).unwrap_or(VALIDATION_FAILURE);
    results.host_avg.push(host_avg);
    results.host_min.push(host_min);

    let (avg_time, min_time_s) = match source {
        TimeSource::Device { frequency_hz } => {
            let avg = robust_mean(&samples.device_ticks, base)
                .map_or(VALIDATION_FAILURE, |t| units::ticks_to_seconds(t, frequency_hz));
            let min = min_time(&samples.device_ticks)
                .map_or(VALIDATION_FAILURE, |t| units::ticks_to_seconds(t, frequency_hz));
            results.device_avg.push(Some(avg));
            results.device_min.push(Some(min));
            (avg, min)
        }
        TimeSource::Host => {
            results.device_avg.push(None);
            results.device_min.push(None);
            (host_avg, host_min)
        }
    };

    let bytes = transferred_bytes(size, copy);
    results.avg_time.push(avg_time);
    results.min_time.push(min_time_s);
    results.avg_bandwidth.push(units::gigabytes_per_second(bytes, avg_time));
    results.peak_bandwidth.push(units::gigabytes_per_second(bytes, min_time_s));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{AgentHandle, PoolHandle};

    fn copy(bidirectional: bool, loopback: bool) -> CopyPayload {
        CopyPayload {
            src_pool: 0,
            dst_pool: 1,
            src_agent: 0,
            dst_agent: usize::from(!loopback),
            src_handle: PoolHandle::new(1),
            dst_handle: PoolHandle::new(2),
            src_agent_handle: AgentHandle::new(1),
            dst_agent_handle: AgentHandle::new(2),
            bidirectional,
            uses_accelerator: true,
        }
    }

    #[test]
    fn iteration_counts() {
        assert_eq!(iteration_count(3, false), 4);
        assert_eq!(iteration_count(10, false), 13);
        assert_eq!(iteration_count(50, true), 1);
    }

    #[test]
    fn huge_base_count_saturates() {
        assert_eq!(iteration_count(u32::MAX, false), u32::MAX);
        assert_eq!(iteration_count(3_579_139_413, false), u32::MAX);
        assert_eq!(iteration_count(u32::MAX, true), 1);
    }

    #[test]
    fn robust_mean_drops_warmup_and_low_tenth() {
        let samples: Vec<f64> = (1..=10).rev().map(f64::from).collect();
        // drops 1 and 2, averages 3..=10
        assert_eq!(robust_mean(&samples, 10), Some(6.5));
        assert_eq!(min_time(&samples), Some(1.0));
    }

    #[test]
    fn robust_mean_keeps_at_most_base_samples() {
        let samples = [1.0, 2.0, 3.0, 4.0, 100.0];
        // base 3: drop 1.0, keep 2, 3, 4
        assert_eq!(robust_mean(&samples, 3), Some(3.0));
    }

    #[test]
    fn robust_mean_falls_back_on_single_sample() {
        assert_eq!(robust_mean(&[0.25], 3), Some(0.25));
        assert_eq!(robust_mean(&[], 3), None);
    }

    #[test]
    fn bidirectional_window_subtracts_only_real_gaps() {
        let ts = |start, end| CopyTimestamps { start, end };
        assert_eq!(device_copy_window(ts(10, 30), None), 20);
        // overlapping: union
        assert_eq!(device_copy_window(ts(10, 30), Some(ts(20, 50))), 40);
        // disjoint: union minus the idle gap
        assert_eq!(device_copy_window(ts(10, 30), Some(ts(40, 60))), 40);
        assert_eq!(device_copy_window(ts(40, 60), Some(ts(10, 30))), 40);
        // touching is not a gap
        assert_eq!(device_copy_window(ts(10, 30), Some(ts(30, 50))), 40);
    }

    #[test]
    fn bytes_double_for_bidirectional_and_loopback() {
        assert_eq!(transferred_bytes(100, &copy(false, false)), 100);
        assert_eq!(transferred_bytes(100, &copy(true, false)), 200);
        assert_eq!(transferred_bytes(100, &copy(false, true)), 200);
        assert_eq!(transferred_bytes(100, &copy(true, true)), 400);
    }

    #[test]
    fn device_time_gives_exact_bandwidth() {
        let mut results = TransactionResults::default();
        let samples = SizeSamples {
            host: vec![0.002; 4],
            device_ticks: vec![100_000.0; 4],
            failed: false,
        };
        let source = TimeSource::Device {
            frequency_hz: 100_000_000,
        };
        reduce_copy_results(&mut results, &copy(false, false), 1_048_576, &samples, 3, source);
        assert_eq!(results.min_time, vec![0.001]);
        assert_eq!(results.peak_bandwidth, vec![1_048_576.0 / 0.001 / 1e9]);
        assert!((results.avg_bandwidth[0] - 1.048_576).abs() < 1e-9);
        assert_eq!(results.device_min, vec![Some(0.001)]);
    }

    #[test]
    fn failure_makes_every_figure_the_sentinel() {
        let mut results = TransactionResults::default();
        let samples = SizeSamples {
            host: vec![0.5],
            device_ticks: vec![10.0],
            failed: true,
        };
        reduce_copy_results(
            &mut results,
            &copy(false, false),
            4096,
            &samples,
            3,
            TimeSource::Host,
        );
        for v in [
            results.host_avg[0],
            results.host_min[0],
            results.avg_time[0],
            results.min_time[0],
            results.avg_bandwidth[0],
            results.peak_bandwidth[0],
        ] {
            assert!(units::is_failure(v));
        }
        assert_eq!(results.device_avg, vec![None]);
    }
}
