//! Monotonic host timer

use rustix::time::{clock_gettime, ClockId, Timespec};

/// Seconds on the monotonic clock
#[allow(clippy::cast_precision_loss)]
fn seconds(ts: Timespec) -> f64 {
    ts.tv_sec as f64 + ts.tv_nsec as f64 * 1e-9
}

/// Wall-clock stopwatch spanning copy issue to completion
#[derive(Debug, Clone, Copy)]
pub struct HostTimer {
    start: f64,
}

impl HostTimer {
    /// Start timing now
    pub fn start() -> Self {
        Self {
            start: seconds(clock_gettime(ClockId::Monotonic)),
        }
    }

    /// Seconds since [`HostTimer::start`]
    pub fn elapsed(&self) -> f64 {
        seconds(clock_gettime(ClockId::Monotonic)) - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_monotonic() {
        let timer = HostTimer::start();
        let a = timer.elapsed();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = timer.elapsed();
        assert!(a >= 0.0);
        assert!(b >= a + 0.001, "{a} -> {b}");
    }
}
