//! Concurrency Tests for the Metadata Cache
//!
//! Load-once coordination across threads: same-key callers share one build,
//! distinct keys build in parallel, and failures are never cached.

use metacache_core::{CacheKey, ReadPermission, Unrestricted};
use metacache_storage::{CacheLookup, MetadataCache, NoAuxiliary};
use metacache_test_utils::{init_tracing, CountingLoader, SchemaGraph, StoreMapping};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

type TestCache = MetadataCache<SchemaGraph, StoreMapping>;

fn lookup_on_threads(
    cache: &Arc<TestCache>,
    loader: &Arc<CountingLoader>,
    keys: &[&str],
) -> Vec<thread::JoinHandle<metacache_core::CacheResult<CacheLookup<SchemaGraph, NoAuxiliary>>>> {
    let barrier = Arc::new(Barrier::new(keys.len()));
    keys.iter()
        .map(|name| {
            let cache = Arc::clone(cache);
            let loader = Arc::clone(loader);
            let barrier = Arc::clone(&barrier);
            let key = CacheKey::new(*name);
            thread::spawn(move || {
                barrier.wait();
                cache.get_or_create_schema_graph(&key, &Unrestricted, |k| loader.load(k))
            })
        })
        .collect()
}

#[test]
fn test_two_threads_same_model_share_one_build() {
    init_tracing();
    let cache = Arc::new(TestCache::default());
    let loader = Arc::new(CountingLoader::new().with_delay(Duration::from_millis(100)));

    let lookups: Vec<_> = lookup_on_threads(&cache, &loader, &["modelA.csdl", "MODELA.csdl"])
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();

    assert_eq!(loader.calls(), 1);
    assert!(Arc::ptr_eq(&lookups[0].collection, &lookups[1].collection));
    assert!(lookups[0].token.ptr_eq(&lookups[1].token));
    assert_eq!(cache.stats().unwrap().schema_entries, 1);
}

#[test]
fn test_distinct_models_build_concurrently() {
    init_tracing();
    let cache = Arc::new(TestCache::default());
    let loader = Arc::new(CountingLoader::new().with_delay(Duration::from_millis(250)));
    let keys = ["a.csdl", "b.csdl", "c.csdl", "d.csdl"];
    let started = Instant::now();

    let lookups: Vec<_> = lookup_on_threads(&cache, &loader, &keys)
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap())
        .collect();

    assert_eq!(loader.calls(), keys.len());
    // One build at a time would need a full second.
    assert!(started.elapsed() < Duration::from_millis(900));
    for (lookup, key) in lookups.iter().zip(keys) {
        assert_eq!(lookup.collection.name, key);
    }
}

#[test]
fn test_failed_build_under_contention_is_retried() {
    init_tracing();
    let cache = Arc::new(TestCache::default());
    let loader = Arc::new(
        CountingLoader::new()
            .with_delay(Duration::from_millis(50))
            .failing_first(1),
    );

    let results: Vec<_> = lookup_on_threads(&cache, &loader, &["flaky.csdl", "flaky.csdl"])
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(loader.calls(), 2);
}

#[test]
fn test_lookup_during_sweeps_never_rebuilds_held_entry() {
    init_tracing();
    let cache = Arc::new(TestCache::default());
    let loader = Arc::new(CountingLoader::new());
    let key = CacheKey::new("hot.csdl");
    let held = cache
        .get_or_create_schema_graph(&key, &Unrestricted, |k| loader.load(k))
        .unwrap();

    let sweeper = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for _ in 0..200 {
                cache.sweep().unwrap();
            }
        })
    };

    for _ in 0..200 {
        let lookup = cache
            .get_or_create_schema_graph(&key, &Unrestricted, |k| loader.load(k))
            .unwrap();
        assert!(Arc::ptr_eq(&lookup.collection, &held.collection));
    }
    sweeper.join().unwrap();
    assert_eq!(loader.calls(), 1);
}

#[test]
fn test_store_tier_shares_query_cache_between_threads() {
    init_tracing();
    let cache = Arc::new(TestCache::default());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let lookup = cache
                    .get_or_create_store(&CacheKey::new("store"), &Unrestricted, |k| {
                        Ok(metacache_core::Loaded::with_auxiliary(
                            Arc::new(StoreMapping::named(k.as_str())),
                            ReadPermission::none(),
                            metacache_storage::QueryCacheManager::new(),
                        ))
                    })
                    .unwrap();
                let plan = lookup
                    .auxiliary
                    .get_or_compile("select-all", || "SELECT * FROM t".to_string());
                (lookup, plan)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for (lookup, plan) in &results[1..] {
        assert!(Arc::ptr_eq(&lookup.auxiliary, &results[0].0.auxiliary));
        assert!(Arc::ptr_eq(plan, &results[0].1));
    }
    assert_eq!(results[0].0.auxiliary.len(), 1);
}
