//! Cache Sweeper Background Task
//!
//! Periodically applies one lifecycle step to every entry of both tiers:
//!
//! - entries whose token died are marked for cleanup
//! - marked entries release their strong result one tick later
//! - demoted entries whose result nobody else holds are purged
//! - store-tier entries evicted by a reset while in use are torn down once
//!   their token dies
//!
//! The sweeper never touches the load path. Each tick takes a tier lock
//! only for the map walk; teardown runs after the lock is released.
//!
//! # Configuration
//!
//! ```rust
//! use metacache_core::CacheConfig;
//! use std::time::Duration;
//!
//! let config = CacheConfig {
//!     sweep_interval: Duration::from_secs(300), // Sweep every five minutes
//!     log_purges: true,                         // Log each purged entry
//! };
//! ```

use crate::cache::{CacheSweepReport, MetadataCache};
use metacache_core::{AuxiliaryResource, CacheConfig};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

// ============================================================================
// METRICS
// ============================================================================

/// Counters for sweeper activity since startup.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Total sweep cycles completed
    pub sweep_cycles: AtomicU64,

    /// Entries marked for cleanup after their token died
    pub entries_marked: AtomicU64,

    /// Entries that released their strong result
    pub entries_demoted: AtomicU64,

    /// Entries removed from their tier
    pub entries_purged: AtomicU64,

    /// Auxiliary resources torn down
    pub auxiliaries_torn_down: AtomicU64,

    /// Teardowns that failed
    pub teardown_failures: AtomicU64,

    /// Sweeps that could not run (poisoned tier lock)
    pub sweep_errors: AtomicU64,
}

impl SweeperMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, report: &CacheSweepReport) {
        let total = report.total();
        self.entries_marked.fetch_add(total.marked, Ordering::Relaxed);
        self.entries_demoted.fetch_add(total.demoted, Ordering::Relaxed);
        self.entries_purged.fetch_add(total.purged, Ordering::Relaxed);
        self.auxiliaries_torn_down
            .fetch_add(total.torn_down, Ordering::Relaxed);
        self.teardown_failures
            .fetch_add(total.teardown_failures, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            entries_marked: self.entries_marked.load(Ordering::Relaxed),
            entries_demoted: self.entries_demoted.load(Ordering::Relaxed),
            entries_purged: self.entries_purged.load(Ordering::Relaxed),
            auxiliaries_torn_down: self.auxiliaries_torn_down.load(Ordering::Relaxed),
            teardown_failures: self.teardown_failures.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sweeper metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweeperSnapshot {
    pub sweep_cycles: u64,
    pub entries_marked: u64,
    pub entries_demoted: u64,
    pub entries_purged: u64,
    pub auxiliaries_torn_down: u64,
    pub teardown_failures: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that sweeps `cache` every `config.sweep_interval`.
///
/// The first sweep happens one full interval after start. The task runs
/// until `shutdown_rx` observes `true` (or its sender is dropped) and
/// returns the metrics collected over its lifetime.
pub async fn sweeper_task<E, S, Q>(
    cache: Arc<MetadataCache<E, S, Q>>,
    config: CacheConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<SweeperMetrics>
where
    E: ?Sized + Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
    Q: AuxiliaryResource,
{
    let metrics = Arc::new(SweeperMetrics::new());

    // tokio rejects a zero period.
    let period = config.sweep_interval.max(MIN_SWEEP_INTERVAL);
    let mut sweep_interval = interval_at(Instant::now() + period, period);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval_ms = period.as_millis() as u64,
        "Cache sweeper started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Cache sweeper shutting down");
                    break;
                }
            }

            _ = sweep_interval.tick() => {
                sweep_cycle(&cache, &metrics);
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        sweep_cycles = snapshot.sweep_cycles,
        entries_purged = snapshot.entries_purged,
        auxiliaries_torn_down = snapshot.auxiliaries_torn_down,
        teardown_failures = snapshot.teardown_failures,
        sweep_errors = snapshot.sweep_errors,
        "Cache sweeper completed"
    );

    metrics
}

/// Perform one sweep of both tiers.
fn sweep_cycle<E, S, Q>(cache: &MetadataCache<E, S, Q>, metrics: &SweeperMetrics)
where
    E: ?Sized + Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
    Q: AuxiliaryResource,
{
    metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

    let report = match cache.sweep() {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Cache sweep failed");
            metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    metrics.record(&report);

    let total = report.total();
    if total.is_idle() {
        tracing::trace!(waiting = total.waiting, "Cache sweep completed with no transitions");
    } else {
        tracing::info!(
            marked = total.marked,
            demoted = total.demoted,
            purged = total.purged,
            torn_down = total.torn_down,
            teardown_failures = total.teardown_failures,
            "Cache sweep completed"
        );
    }
}

/// A running sweeper task and its shutdown switch.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Arc<SweeperMetrics>>,
}

impl SweeperHandle {
    /// Spawn [`sweeper_task`] on the current Tokio runtime.
    pub fn spawn<E, S, Q>(cache: Arc<MetadataCache<E, S, Q>>, config: CacheConfig) -> Self
    where
        E: ?Sized + Send + Sync + 'static,
        S: ?Sized + Send + Sync + 'static,
        Q: AuxiliaryResource,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sweeper_task(cache, config, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Signal shutdown and wait for the task to finish.
    pub async fn shutdown(self) -> Result<Arc<SweeperMetrics>, JoinError> {
        let _ = self.shutdown_tx.send(true);
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{EntryStage, QueryCacheManager};
    use metacache_core::{CacheKey, Loaded, ReadPermission, Unrestricted};
    use metacache_test_utils::{CountingLoader, SchemaGraph, StoreMapping};

    type TestCache = MetadataCache<SchemaGraph, StoreMapping>;

    #[test]
    fn test_metrics_snapshot_reflects_record() {
        let metrics = SweeperMetrics::new();
        let mut report = CacheSweepReport::default();
        report.schema.purged = 2;
        report.store.torn_down = 1;
        metrics.record(&report);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.entries_purged, 2);
        assert_eq!(snapshot.auxiliaries_torn_down, 1);
        assert_eq!(snapshot.sweep_cycles, 0);
    }

    #[test]
    fn test_sweep_cycle_counts_transitions() {
        let cache = TestCache::default();
        let loader = CountingLoader::new();
        drop(
            cache
                .get_or_create_schema_graph(&CacheKey::new("a"), &Unrestricted, |k| loader.load(k))
                .unwrap(),
        );

        let metrics = SweeperMetrics::new();
        sweep_cycle(&cache, &metrics);
        sweep_cycle(&cache, &metrics);
        sweep_cycle(&cache, &metrics);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sweep_cycles, 3);
        assert_eq!(snapshot.entries_marked, 1);
        assert_eq!(snapshot.entries_demoted, 1);
        assert_eq!(snapshot.entries_purged, 1);
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown_signal() {
        let cache = Arc::new(TestCache::default());
        let config = CacheConfig::default().with_sweep_interval(Duration::from_secs(3600));
        let handle = SweeperHandle::spawn(cache, config);

        let metrics = handle.shutdown().await.unwrap();
        assert_eq!(metrics.snapshot().sweep_cycles, 0);
    }

    #[tokio::test]
    async fn test_task_purges_and_tears_down_over_time() {
        let cache = Arc::new(TestCache::default());
        let key = CacheKey::new("store");
        let lookup = cache
            .get_or_create_store(&key, &Unrestricted, |k| {
                Ok(Loaded::with_auxiliary(
                    Arc::new(StoreMapping::named(k.as_str())),
                    ReadPermission::none(),
                    QueryCacheManager::new(),
                ))
            })
            .unwrap();
        let query_cache = Arc::clone(&lookup.auxiliary);
        drop(lookup);
        assert_eq!(cache.store_tier().stage(&key).unwrap(), Some(EntryStage::Stale));

        let config = CacheConfig::default().with_sweep_interval(Duration::from_millis(10));
        let handle = SweeperHandle::spawn(Arc::clone(&cache), config);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.store_tier().contains(&key).unwrap() {
            assert!(std::time::Instant::now() < deadline, "entry was never purged");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let metrics = handle.shutdown().await.unwrap().snapshot();
        assert!(metrics.sweep_cycles >= 3);
        assert_eq!(metrics.entries_purged, 1);
        assert_eq!(metrics.auxiliaries_torn_down, 1);
        assert!(query_cache.is_closed());
    }
}
