//! Completion waits
//!
//! The wait mode is chosen once per run from [`RunConfig`](crate::RunConfig)
//! and used for every completion signal of that run. Neither mode times out.

use crate::config::WaitMode;
use crate::error::Result;
use crate::platform::{Platform, SignalHandle};
use std::fmt::Debug;

/// Blocks until a completion signal drops below one
pub trait CompletionWait: Debug + Send + Sync {
    /// Wait for `signal` to complete
    ///
    /// # Errors
    ///
    /// Returns error if the platform fails to read the signal.
    fn wait(&self, platform: &dyn Platform, signal: SignalHandle) -> Result<()>;

    /// Mode this waiter implements
    fn mode(&self) -> WaitMode;
}

/// Busy-polls the signal value
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinWait;

impl CompletionWait for SpinWait {
    fn wait(&self, platform: &dyn Platform, signal: SignalHandle) -> Result<()> {
        while platform.signal_load(signal)? >= 1 {
            std::hint::spin_loop();
        }
        Ok(())
    }

    fn mode(&self) -> WaitMode {
        WaitMode::Active
    }
}

/// Parks the thread in the platform's blocking wait
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockingWait;

impl CompletionWait for BlockingWait {
    fn wait(&self, platform: &dyn Platform, signal: SignalHandle) -> Result<()> {
        platform.signal_wait_blocking(signal, 1).map(|_| ())
    }

    fn mode(&self) -> WaitMode {
        WaitMode::Blocked
    }
}

/// Waiter for a run's wait mode
pub fn waiter_for(mode: WaitMode) -> Box<dyn CompletionWait> {
    match mode {
        WaitMode::Active => Box::new(SpinWait),
        WaitMode::Blocked => Box::new(BlockingWait),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{FabricPreset, SoftwarePlatform};

    #[test]
    fn both_modes_return_once_signal_is_low() {
        let platform = SoftwarePlatform::preset(FabricPreset::Workstation).unwrap();
        for mode in [WaitMode::Active, WaitMode::Blocked] {
            let waiter = waiter_for(mode);
            assert_eq!(waiter.mode(), mode);
            let signal = platform.signal_create(1).unwrap();
            platform.signal_store(signal, 0).unwrap();
            waiter.wait(&platform, signal).unwrap();
            platform.signal_destroy(signal).unwrap();
        }
    }

    #[test]
    fn blocking_wait_wakes_on_store_from_another_thread() {
        let platform = std::sync::Arc::new(
            SoftwarePlatform::preset(FabricPreset::Workstation).unwrap(),
        );
        let signal = platform.signal_create(1).unwrap();
        let remote = std::sync::Arc::clone(&platform);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            remote.signal_store(signal, 0).unwrap();
        });
        BlockingWait.wait(platform.as_ref(), signal).unwrap();
        handle.join().unwrap();
        assert_eq!(platform.signal_load(signal).unwrap(), 0);
    }
}
