//! Constants for metacache
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// SWEEPER
// ============================================================================

/// Default interval between background sweeps in seconds (5 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Sweep interval used by `CacheConfig::development()` in milliseconds
pub const DEVELOPMENT_SWEEP_INTERVAL_MS: u64 = 1000;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Sweep interval override in whole seconds
pub const ENV_SWEEP_INTERVAL_SECS: &str = "METACACHE_SWEEP_INTERVAL_SECS";

/// Sweep interval override in milliseconds (wins over the seconds variable)
pub const ENV_SWEEP_INTERVAL_MS: &str = "METACACHE_SWEEP_INTERVAL_MS";

/// Whether to log each purged entry ("false" disables)
pub const ENV_LOG_PURGES: &str = "METACACHE_LOG_PURGES";

// ============================================================================
// ARTIFACT LOCATIONS
// ============================================================================

/// Separator between artifact locations in a raw path string and in composed keys
pub const LOCATION_SEPARATOR: char = '|';

/// Scheme prefix for artifacts embedded in a named assembly
pub const EMBEDDED_RESOURCE_SCHEME: &str = "res://";

/// File extensions recognized as schema artifacts
pub const ARTIFACT_EXTENSIONS: &[&str] = &["csdl", "ssdl", "msl"];
