//! Configuration Module
//!
//! Handles loading reclaim and storage settings from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Delay in milliseconds before the first background sweep
    pub reclaim_delay_ms: u64,
    /// Interval in milliseconds between background sweeps
    pub reclaim_period_ms: u64,
    /// Upper bound on threads sweeping caches concurrently
    pub reclaim_workers: usize,
    /// Directory under which persistent caches create their alias directories
    pub base_path: PathBuf,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_RECLAIM_DELAY_MS` - First sweep delay (default: 180000)
    /// - `CACHE_RECLAIM_PERIOD_MS` - Sweep interval (default: 420000)
    /// - `CACHE_RECLAIM_WORKERS` - Sweep threads, at least 1 (default: 4)
    /// - `CACHE_BASE_PATH` - Persistent cache root (default: .tiered_cache)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reclaim_delay_ms: env::var("CACHE_RECLAIM_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.reclaim_delay_ms),
            reclaim_period_ms: env::var("CACHE_RECLAIM_PERIOD_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|period| *period > 0)
                .unwrap_or(defaults.reclaim_period_ms),
            reclaim_workers: env::var("CACHE_RECLAIM_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|workers: usize| workers.max(1))
                .unwrap_or(defaults.reclaim_workers),
            base_path: env::var("CACHE_BASE_PATH")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.base_path),
        }
    }

    // == Builder Helpers ==
    /// Overrides the sweep delay and period, mostly useful in tests.
    pub fn with_reclaim(mut self, delay: Duration, period: Duration) -> Self {
        self.reclaim_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.reclaim_period_ms = u64::try_from(period.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        self
    }

    /// Overrides the persistent cache root.
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn reclaim_delay(&self) -> Duration {
        Duration::from_millis(self.reclaim_delay_ms)
    }

    pub fn reclaim_period(&self) -> Duration {
        Duration::from_millis(self.reclaim_period_ms.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reclaim_delay_ms: 3 * 60 * 1000,
            reclaim_period_ms: 7 * 60 * 1000,
            reclaim_workers: 4,
            base_path: PathBuf::from(".tiered_cache"),
        }
    }
}
