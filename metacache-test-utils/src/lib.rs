//! metacache Test Utilities
//!
//! Centralized test infrastructure for the metacache workspace:
//! - Stand-in collections and instrumented loaders
//! - Recording auxiliary resources for teardown assertions
//! - Proptest generators for keys and location lists
//! - Artifact directory fixtures
//! - Custom assertions for cache errors

// Re-export core types for convenience
pub use metacache_core::{
    AuthorizationError, AuxiliaryResource, CacheConfig, CacheError, CacheKey, CacheResult,
    LoadError, Loaded, NoAuxiliary, ReadPermission, TeardownError,
};

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// MOCK COLLECTIONS
// ============================================================================

/// Stand-in for a built schema graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaGraph {
    pub name: String,
    pub entity_types: Vec<String>,
}

impl SchemaGraph {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_types: Vec::new(),
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_types.push(entity_type.into());
        self
    }
}

/// Stand-in for a built store and mapping collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMapping {
    pub name: String,
}

impl StoreMapping {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

// ============================================================================
// MOCK LOADERS
// ============================================================================

/// Loader that counts builds and can be slowed down or made to fail.
///
/// Every successful call returns a fresh [`SchemaGraph`] named after the
/// key's original spelling, so reference identity tells builds apart.
#[derive(Debug, Default)]
pub struct CountingLoader {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Option<Duration>,
    paths: Vec<PathBuf>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every build.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `n` builds with a schema validation error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Report `paths` as requiring read access.
    pub fn with_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Build a schema graph for `key`.
    pub fn load(&self, key: &CacheKey) -> Result<Loaded<SchemaGraph>, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LoadError::SchemaValidation {
                reason: format!("injected failure for {}", key),
            });
        }

        Ok(Loaded::new(
            Arc::new(SchemaGraph::named(key.as_str())),
            ReadPermission::new(self.paths.iter().cloned()),
        ))
    }

    /// Number of builds attempted so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MOCK AUXILIARY RESOURCES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum TeardownBehavior {
    #[default]
    Succeed,
    Fail,
    Panic,
}

/// Auxiliary resource that records teardown calls.
///
/// Clones share their counter, so a test keeps a clone as a recorder after
/// handing the original to a loader.
#[derive(Debug, Clone, Default)]
pub struct RecordingResource {
    teardowns: Arc<AtomicUsize>,
    behavior: TeardownBehavior,
}

impl RecordingResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A resource whose teardown returns an error.
    pub fn failing() -> Self {
        Self {
            behavior: TeardownBehavior::Fail,
            ..Self::default()
        }
    }

    /// A resource whose teardown panics.
    pub fn panicking() -> Self {
        Self {
            behavior: TeardownBehavior::Panic,
            ..Self::default()
        }
    }

    /// Number of teardown calls observed, failed ones included.
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

impl AuxiliaryResource for RecordingResource {
    fn teardown(&self) -> Result<(), TeardownError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            TeardownBehavior::Succeed => Ok(()),
            TeardownBehavior::Fail => Err(TeardownError {
                resource: "recording resource".to_string(),
                reason: "injected failure".to_string(),
            }),
            TeardownBehavior::Panic => panic!("injected teardown panic"),
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and artifact location strings.

    use super::*;
    use proptest::prelude::*;

    /// Generate a plausible artifact file name such as `Model_3.csdl`.
    pub fn arb_artifact_name() -> impl Strategy<Value = String> {
        (
            "[A-Za-z][A-Za-z0-9_]{0,12}",
            prop::sample::select(vec!["csdl", "ssdl", "msl"]),
        )
            .prop_map(|(stem, ext)| format!("{}.{}", stem, ext))
    }

    /// Generate a cache key from an artifact name.
    pub fn arb_cache_key() -> impl Strategy<Value = CacheKey> {
        arb_artifact_name().prop_map(CacheKey::new)
    }

    /// Generate an ASCII string together with a random re-casing of it.
    pub fn arb_case_variants() -> impl Strategy<Value = (String, String)> {
        "[A-Za-z0-9_./]{1,24}".prop_flat_map(|original| {
            let len = original.len();
            (Just(original), prop::collection::vec(any::<bool>(), len)).prop_map(
                |(original, flips)| {
                    let variant = original
                        .chars()
                        .zip(flips)
                        .map(|(c, flip)| {
                            if flip {
                                c.to_ascii_uppercase()
                            } else {
                                c.to_ascii_lowercase()
                            }
                        })
                        .collect();
                    (original, variant)
                },
            )
        })
    }

    /// Generate 1 to 4 artifact names.
    pub fn arb_location_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_artifact_name(), 1..=4)
    }

    /// Generate a sequence of sweeps (`false`) and lookups (`true`).
    pub fn arb_sweep_schedule() -> impl Strategy<Value = Vec<bool>> {
        prop::collection::vec(any::<bool>(), 1..24)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    /// A temporary directory holding `modelA.csdl`, `modelA.ssdl` and
    /// `modelA.msl` plus one unrelated file.
    pub fn artifact_dir() -> io::Result<TempDir> {
        let dir = tempfile::tempdir()?;
        for name in ["modelA.csdl", "modelA.ssdl", "modelA.msl"] {
            fs::write(dir.path().join(name), "<Schema />")?;
        }
        fs::write(dir.path().join("README.txt"), "not an artifact")?;
        Ok(dir)
    }

    /// A configuration with a short sweep interval for async tests.
    pub fn fast_sweep_config() -> CacheConfig {
        CacheConfig::default()
            .with_sweep_interval(Duration::from_millis(10))
            .with_log_purges(true)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for cache results.

    use super::*;

    /// Assert that a result failed authorization.
    #[track_caller]
    pub fn assert_read_denied<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Authorization(AuthorizationError::ReadDenied { .. })) => {}
            other => panic!("Expected ReadDenied, got: {:?}", other),
        }
    }

    /// Assert that a result carries a loader failure.
    #[track_caller]
    pub fn assert_load_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Load(_)) => {}
            other => panic!("Expected Load error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
