//! Configuration types

use crate::constants::{
    DEFAULT_SWEEP_INTERVAL_SECS, DEVELOPMENT_SWEEP_INTERVAL_MS, ENV_LOG_PURGES,
    ENV_SWEEP_INTERVAL_MS, ENV_SWEEP_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the metadata cache and its background sweeper.
///
/// # Example
///
/// ```rust
/// use metacache_core::CacheConfig;
/// use std::time::Duration;
///
/// let config = CacheConfig::default().with_sweep_interval(Duration::from_secs(60));
/// assert_eq!(config.sweep_interval, Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How often the sweeper advances every entry one lifecycle step
    /// (default: 5 minutes)
    pub sweep_interval: Duration,

    /// Whether to log each purged entry (default: true)
    pub log_purges: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            log_purges: true,
        }
    }
}

impl CacheConfig {
    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `METACACHE_SWEEP_INTERVAL_MS`: Sweep interval in milliseconds (wins when set)
    /// - `METACACHE_SWEEP_INTERVAL_SECS`: Sweep interval in seconds (default: 300)
    /// - `METACACHE_LOG_PURGES`: Whether to log purged entries (default: true)
    pub fn from_env() -> Self {
        let sweep_interval = std::env::var(ENV_SWEEP_INTERVAL_MS)
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or_else(|| {
                Duration::from_secs(
                    std::env::var(ENV_SWEEP_INTERVAL_SECS)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
                )
            });

        let log_purges = std::env::var(ENV_LOG_PURGES)
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            sweep_interval,
            log_purges,
        }
    }

    /// Create a configuration for development/testing with a short interval.
    pub fn development() -> Self {
        Self {
            sweep_interval: Duration::from_millis(DEVELOPMENT_SWEEP_INTERVAL_MS),
            log_purges: true,
        }
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Enable or disable per-entry purge logging.
    pub fn with_log_purges(mut self, enabled: bool) -> Self {
        self.log_purges = enabled;
        self
    }
}
