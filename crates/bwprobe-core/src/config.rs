//! Run-mode configuration
//!
//! Every run-mode toggle the core honours lives in [`RunConfig`]. It is built
//! once at startup, usually from the process environment, and passed by
//! reference to whatever needs it. Nothing else in the crate reads the
//! environment.

use tracing::{debug, warn};

/// Environment key selecting OS-blocking waits on completion signals
pub const ENV_RUN_BLOCKING: &str = "BWPROBE_RUN_BLOCKING";
/// Environment key overriding the base iteration count
pub const ENV_ITER_CNT: &str = "BWPROBE_ITER_CNT";
/// Environment key marking an implicit default run
pub const ENV_DEFAULT_RUN: &str = "BWPROBE_DEFAULT_RUN";
/// Environment key keeping coarse- instead of fine-grained host pools
pub const ENV_SKIP_HOST_FINE_GRAINED: &str = "BWPROBE_SKIP_HOST_FINE_GRAINED_POOL";
/// Environment key keeping fine- instead of coarse-grained accelerator pools
pub const ENV_SKIP_ACCEL_COARSE_GRAINED: &str = "BWPROBE_SKIP_ACCEL_COARSE_GRAINED_POOL";

/// Base iteration count when nothing overrides it
pub const DEFAULT_BASE_ITERATIONS: u32 = 3;

/// How the executor waits on a completion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitMode {
    /// Spin on the signal value
    #[default]
    Active,
    /// Park the thread in the platform's blocking wait
    Blocked,
}

/// Run-mode toggles, constructed once per process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Spin or block while waiting for copies
    pub wait_mode: WaitMode,

    /// Base iteration count before outlier padding
    pub base_iterations: u32,

    /// This run was started without an explicit request
    pub default_run: bool,

    /// Keep coarse-grained host pools instead of fine-grained ones
    pub host_keep_coarse: bool,

    /// Keep fine-grained accelerator pools instead of coarse-grained ones
    pub accel_keep_fine: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            wait_mode: WaitMode::Active,
            base_iterations: DEFAULT_BASE_ITERATIONS,
            default_run: false,
            host_keep_coarse: false,
            accel_keep_fine: false,
        }
    }
}

impl RunConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    ///
    /// Presence of a key turns its toggle on, matching how the platform's
    /// own tooling treats these variables; only the iteration count is parsed.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if lookup(ENV_RUN_BLOCKING).is_some() {
            config.wait_mode = WaitMode::Blocked;
        }
        config.default_run = lookup(ENV_DEFAULT_RUN).is_some();
        config.host_keep_coarse = lookup(ENV_SKIP_HOST_FINE_GRAINED).is_some();
        config.accel_keep_fine = lookup(ENV_SKIP_ACCEL_COARSE_GRAINED).is_some();

        if let Some(raw) = lookup(ENV_ITER_CNT) {
            match raw.trim().parse::<i64>() {
                Ok(n) if n > 0 => {
                    config.base_iterations = u32::try_from(n).unwrap_or(u32::MAX);
                }
                Ok(n) => warn!("{ENV_ITER_CNT} must be positive, ignoring {n}"),
                Err(e) => warn!("{ENV_ITER_CNT}={raw:?} is not a number ({e}), ignoring"),
            }
        }

        debug!("Run configuration: {config:?}");
        config
    }

    /// Mark this configuration as an implicit default run
    #[must_use]
    pub const fn with_default_run(mut self, default_run: bool) -> Self {
        self.default_run = default_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = RunConfig::from_lookup(|_| None);
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.base_iterations, DEFAULT_BASE_ITERATIONS);
        assert_eq!(config.wait_mode, WaitMode::Active);
    }

    #[test]
    fn toggles_follow_presence() {
        let config = RunConfig::from_lookup(lookup_from(&[
            (ENV_RUN_BLOCKING, "1"),
            (ENV_DEFAULT_RUN, "true"),
            (ENV_SKIP_HOST_FINE_GRAINED, ""),
            (ENV_SKIP_ACCEL_COARSE_GRAINED, "yes"),
        ]));
        assert_eq!(config.wait_mode, WaitMode::Blocked);
        assert!(config.default_run);
        assert!(config.host_keep_coarse);
        assert!(config.accel_keep_fine);
    }

    #[test]
    fn iteration_override_is_parsed() {
        let config = RunConfig::from_lookup(lookup_from(&[(ENV_ITER_CNT, " 50 ")]));
        assert_eq!(config.base_iterations, 50);
    }

    #[test]
    fn largest_iteration_override_is_usable() {
        let config = RunConfig::from_lookup(lookup_from(&[(ENV_ITER_CNT, "4294967295")]));
        assert_eq!(config.base_iterations, u32::MAX);
        assert_eq!(
            crate::stats::iteration_count(config.base_iterations, false),
            u32::MAX
        );
    }

    #[test]
    fn bad_iteration_override_is_ignored() {
        for raw in ["-4", "0", "many"] {
            let config = RunConfig::from_lookup(lookup_from(&[(ENV_ITER_CNT, raw)]));
            assert_eq!(config.base_iterations, DEFAULT_BASE_ITERATIONS, "{raw}");
        }
    }
}
