//! Auxiliary resources owned by store-tier entries.
//!
//! Each store-tier entry owns a [`QueryCacheManager`]: a secondary cache of
//! compiled query plans built against that entry's store schema. Unlike the
//! schema graph itself it is not reclaimed by dropping references; it must be
//! torn down explicitly, and the registry sequences that teardown so it runs
//! exactly once and never while the entry's token is alive.

use dashmap::DashMap;
use metacache_core::{AuxiliaryResource, TeardownError};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Default upper bound on cached plans per manager.
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 1000;

type Plan = Arc<dyn Any + Send + Sync>;

struct PlanSlot {
    plan: Plan,
    hits: AtomicU64,
}

/// Concurrent compiled-plan cache scoped to one store-tier entry.
pub struct QueryCacheManager {
    plans: DashMap<String, PlanSlot>,
    capacity: usize,
    closed: AtomicBool,
}

impl QueryCacheManager {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUERY_CACHE_CAPACITY)
    }

    /// Create a manager that holds at most `capacity` plans.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            plans: DashMap::new(),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Look up a plan of type `P`.
    ///
    /// Returns `None` when the key is absent, holds a plan of another type,
    /// or the manager has been torn down.
    pub fn try_get<P: Any + Send + Sync>(&self, key: &str) -> Option<Arc<P>> {
        if self.is_closed() {
            return None;
        }
        let slot = self.plans.get(key)?;
        slot.hits.fetch_add(1, Ordering::Relaxed);
        Arc::clone(&slot.plan).downcast::<P>().ok()
    }

    /// Return the cached plan for `key`, compiling it with `compile` on a miss.
    ///
    /// When the manager is full or torn down the compiled plan is returned
    /// without being cached.
    pub fn get_or_compile<P, F>(&self, key: &str, compile: F) -> Arc<P>
    where
        P: Any + Send + Sync,
        F: FnOnce() -> P,
    {
        if let Some(plan) = self.try_get::<P>(key) {
            return plan;
        }

        let plan = Arc::new(compile());
        if self.is_closed() || self.plans.len() >= self.capacity {
            return plan;
        }

        let cached = {
            let slot = self.plans.entry(key.to_string()).or_insert_with(|| PlanSlot {
                plan: Arc::clone(&plan) as Plan,
                hits: AtomicU64::new(0),
            });
            Arc::clone(&slot.plan)
        };

        // A teardown that cleared the map before this insert must not leave it behind.
        if self.is_closed() {
            self.plans.remove(key);
            return plan;
        }

        // Another thread may have compiled the same key first; prefer its plan.
        cached.downcast::<P>().unwrap_or(plan)
    }

    /// Number of hits recorded for `key`.
    pub fn hits(&self, key: &str) -> u64 {
        self.plans
            .get(key)
            .map(|slot| slot.hits.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Whether [`AuxiliaryResource::teardown`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for QueryCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCacheManager")
            .field("plans", &self.plans.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AuxiliaryResource for QueryCacheManager {
    fn teardown(&self) -> Result<(), TeardownError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(TeardownError {
                resource: "query cache manager".to_string(),
                reason: "already torn down".to_string(),
            });
        }
        self.plans.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct CompiledPlan(String);

    #[test]
    fn test_get_or_compile_caches_plan() {
        let manager = QueryCacheManager::new();
        let first = manager.get_or_compile("q1", || CompiledPlan("select 1".into()));
        let second = manager.get_or_compile("q1", || CompiledPlan("never built".into()));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.hits("q1"), 1);
    }

    #[test]
    fn test_try_get_with_wrong_type_is_none() {
        let manager = QueryCacheManager::new();
        manager.get_or_compile("q1", || CompiledPlan("select 1".into()));
        assert!(manager.try_get::<u64>("q1").is_none());
        assert!(manager.try_get::<CompiledPlan>("q1").is_some());
    }

    #[test]
    fn test_capacity_bounds_cached_plans() {
        let manager = QueryCacheManager::with_capacity(1);
        manager.get_or_compile("q1", || CompiledPlan("a".into()));
        let uncached = manager.get_or_compile("q2", || CompiledPlan("b".into()));
        assert_eq!(uncached.0, "b");
        assert_eq!(manager.len(), 1);
        assert!(manager.try_get::<CompiledPlan>("q2").is_none());
    }

    #[test]
    fn test_teardown_empties_and_closes() {
        let manager = QueryCacheManager::new();
        manager.get_or_compile("q1", || CompiledPlan("a".into()));
        manager.teardown().unwrap();

        assert!(manager.is_closed());
        assert!(manager.is_empty());
        assert!(manager.try_get::<CompiledPlan>("q1").is_none());

        // Plans still compile after teardown, they just are not kept.
        manager.get_or_compile("q1", || CompiledPlan("a".into()));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_teardown_racing_with_compiles_leaves_nothing_cached() {
        for _ in 0..64 {
            let manager = Arc::new(QueryCacheManager::new());
            let barrier = Arc::new(std::sync::Barrier::new(5));

            let compilers: Vec<_> = (0..4)
                .map(|worker| {
                    let manager = Arc::clone(&manager);
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        for i in 0..32 {
                            let key = format!("q{}-{}", worker, i);
                            manager.get_or_compile(&key, || CompiledPlan(key.clone()));
                        }
                    })
                })
                .collect();

            barrier.wait();
            manager.teardown().unwrap();
            for compiler in compilers {
                compiler.join().unwrap();
            }

            assert!(manager.is_closed());
            assert!(manager.is_empty());
        }
    }

    #[test]
    fn test_second_teardown_is_reported() {
        let manager = QueryCacheManager::new();
        manager.teardown().unwrap();
        let err = manager.teardown().unwrap_err();
        assert_eq!(err.reason, "already torn down");
    }
}
