//! metacache Storage - Registries, Entries and the Sweeper
//!
//! The cache proper: per-tier registries with load-once coordination, the
//! entry lifecycle driven by liveness tokens, the artifact-loader memo and
//! the background sweeper. Shared types live in `metacache-core`.

pub mod cache;
pub mod jobs;

// Re-export cache types for callers
pub use cache::{
    global, read_permission_for, ArtifactLoader, ArtifactLoaderCache, ArtifactResolver,
    CacheEntry, CacheLookup, CacheStats, CacheSweepReport, DynCollection, EntryStage,
    GlobalMetadataCache, MetadataCache, PathListResolver, QueryCacheManager, Registry,
    SweepAction, SweepReport, TokenGrant,
};
pub use jobs::{sweeper_task, SweeperHandle, SweeperMetrics, SweeperSnapshot};

pub use metacache_core::{
    AuthorizationError, AuxiliaryResource, CacheConfig, CacheError, CacheKey, CacheResult,
    CacheToken, LoadError, Loaded, NoAuxiliary, ReadAuthorizer, ReadPermission, ResolveError,
    RootedAuthorizer, TeardownError, TierKind, Unrestricted,
};
