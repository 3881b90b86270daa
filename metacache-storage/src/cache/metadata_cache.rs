//! The two-tier metadata cache service.
//!
//! [`MetadataCache`] bundles the schema-graph tier, the store tier and the
//! artifact-loader memo. Construct one and inject it where schema graphs are
//! needed; [`global`] offers a lazily-initialised process-wide instance for
//! hosts that want ambient access.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(MetadataCache::<ConceptualModel, StoreModel>::new(CacheConfig::from_env()));
//! let sweeper = SweeperHandle::spawn(Arc::clone(&cache), cache.config().clone());
//!
//! let lookup = cache.get_or_create_schema_graph(&key, &Unrestricted, |key| build_model(key))?;
//! workspace.attach(lookup.collection, lookup.token);
//! ```

use super::artifact::{ArtifactLoader, ArtifactLoaderCache, ArtifactResolver, PathListResolver};
use super::auxiliary::QueryCacheManager;
use super::registry::{CacheLookup, Registry, SweepReport};
use metacache_core::{
    AuxiliaryResource, CacheConfig, CacheKey, CacheResult, LoadError, Loaded, NoAuxiliary,
    ReadAuthorizer, TierKind,
};
use once_cell::sync::Lazy;
use std::any::Any;
use std::sync::{Arc, PoisonError, RwLock};

/// Type-erased collection used by the process-wide cache.
pub type DynCollection = dyn Any + Send + Sync;

/// The process-wide cache type.
pub type GlobalMetadataCache = MetadataCache<DynCollection, DynCollection>;

static GLOBAL: Lazy<Arc<GlobalMetadataCache>> =
    Lazy::new(|| Arc::new(MetadataCache::new(CacheConfig::from_env())));

/// Process-wide cache, created on first use from [`CacheConfig::from_env`].
///
/// The background sweeper is not started implicitly; hosts spawn it with
/// `SweeperHandle::spawn(global(), config)` from inside a Tokio runtime.
pub fn global() -> Arc<GlobalMetadataCache> {
    Arc::clone(&GLOBAL)
}

/// Sweep counts for both tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheSweepReport {
    pub schema: SweepReport,
    pub store: SweepReport,
}

impl CacheSweepReport {
    pub fn total(&self) -> SweepReport {
        self.schema.merge(self.store)
    }
}

/// Point-in-time sizes of the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub schema_entries: usize,
    pub store_entries: usize,
    pub store_evicted: usize,
    pub memoized_loaders: usize,
}

/// Two-tier cache of schema graphs and store/mapping collections.
pub struct MetadataCache<E: ?Sized, S: ?Sized, Q = QueryCacheManager> {
    schema: Registry<E, NoAuxiliary>,
    store: Registry<S, Q>,
    artifact_loaders: RwLock<Arc<ArtifactLoaderCache>>,
    config: CacheConfig,
}

impl<E, S, Q> MetadataCache<E, S, Q>
where
    E: ?Sized + Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
    Q: AuxiliaryResource,
{
    pub fn new(config: CacheConfig) -> Self {
        Self::with_resolver(config, Arc::new(PathListResolver))
    }

    /// Create a cache that resolves artifact locations with `resolver`.
    pub fn with_resolver(config: CacheConfig, resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            schema: Registry::new(TierKind::SchemaGraph).with_log_purges(config.log_purges),
            store: Registry::new(TierKind::Store).with_log_purges(config.log_purges),
            artifact_loaders: RwLock::new(Arc::new(ArtifactLoaderCache::new(resolver))),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn schema_tier(&self) -> &Registry<E, NoAuxiliary> {
        &self.schema
    }

    pub fn store_tier(&self) -> &Registry<S, Q> {
        &self.store
    }

    /// Get or build the schema graph for `key`.
    pub fn get_or_create_schema_graph<F>(
        &self,
        key: &CacheKey,
        authorizer: &dyn ReadAuthorizer,
        loader: F,
    ) -> CacheResult<CacheLookup<E, NoAuxiliary>>
    where
        F: FnOnce(&CacheKey) -> Result<Loaded<E, NoAuxiliary>, LoadError>,
    {
        self.schema.get_or_create(key, authorizer, loader)
    }

    /// Get or build the store and mapping collection for `key`.
    ///
    /// The loader also supplies the auxiliary resource the entry will own.
    pub fn get_or_create_store<F>(
        &self,
        key: &CacheKey,
        authorizer: &dyn ReadAuthorizer,
        loader: F,
    ) -> CacheResult<CacheLookup<S, Q>>
    where
        F: FnOnce(&CacheKey) -> Result<Loaded<S, Q>, LoadError>,
    {
        self.store.get_or_create(key, authorizer, loader)
    }

    fn artifact_loader_cache(&self) -> Arc<ArtifactLoaderCache> {
        let guard = self
            .artifact_loaders
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Resolve a raw artifact path string, memoized by the exact string.
    pub fn resolve_artifact_loaders(&self, raw: &str) -> CacheResult<Arc<[ArtifactLoader]>> {
        Ok(self.artifact_loader_cache().get_or_resolve(raw)?)
    }

    /// Reset both tiers and the artifact-loader memo.
    ///
    /// Each tier is reset under its own lock, so lookups may interleave with
    /// a reset. Tokens and collections handed out earlier stay valid. A
    /// poisoned tier does not stop the other tier or the memo from being
    /// reset; the first error is returned afterwards.
    pub fn clear(&self) -> CacheResult<()> {
        let schema = self.schema.clear();
        let store = self.store.clear();

        {
            let mut memo = self
                .artifact_loaders
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let fresh = Arc::new(memo.fresh());
            *memo = fresh;
        }

        match schema.and(store) {
            Ok(()) => {
                tracing::info!("Metadata cache cleared");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Metadata cache cleared partially");
                Err(e)
            }
        }
    }

    /// Advance every entry of both tiers one lifecycle step.
    ///
    /// A poisoned schema tier does not prevent the store tier from sweeping;
    /// the first error is returned after both tiers were attempted.
    pub fn sweep(&self) -> CacheResult<CacheSweepReport> {
        let schema = self.schema.sweep();
        let store = self.store.sweep();
        Ok(CacheSweepReport {
            schema: schema?,
            store: store?,
        })
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats {
            schema_entries: self.schema.len()?,
            store_entries: self.store.len()?,
            store_evicted: self.store.evicted_len()?,
            memoized_loaders: self.artifact_loader_cache().len(),
        })
    }
}

impl<E, S, Q> Default for MetadataCache<E, S, Q>
where
    E: ?Sized + Send + Sync + 'static,
    S: ?Sized + Send + Sync + 'static,
    Q: AuxiliaryResource,
{
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
