//! Two-tier metadata cache with cooperative reclamation.
//!
//! Schema graphs are expensive to build and shared by many callers. This
//! module caches them per key with three guarantees:
//!
//! - **Load once**: concurrent lookups of one key run the loader once and all
//!   observe the same collection. Distinct keys build in parallel.
//! - **Token-driven eviction**: every lookup returns a [`CacheToken`]. The
//!   cache only keeps a weak reference to it; once no caller holds the token
//!   the sweeper walks the entry through mark, demote and purge.
//! - **Exactly-once teardown**: store-tier entries own a [`QueryCacheManager`]
//!   that is torn down once, and never while the entry's token is alive.
//!
//! # Example
//!
//! ```ignore
//! let cache = MetadataCache::<Model, StoreModel>::new(CacheConfig::default());
//! let lookup = cache.get_or_create_schema_graph(&CacheKey::new("model.csdl"), &Unrestricted, load_model)?;
//!
//! // Keep the token next to the collection for as long as it is in use.
//! let (model, token) = (lookup.collection, lookup.token);
//! ```
//!
//! [`CacheToken`]: metacache_core::CacheToken

pub mod artifact;
pub mod auxiliary;
pub mod entry;
pub mod metadata_cache;
pub mod registry;

pub use artifact::{
    read_permission_for, ArtifactLoader, ArtifactLoaderCache, ArtifactResolver, PathListResolver,
};
pub use auxiliary::{QueryCacheManager, DEFAULT_QUERY_CACHE_CAPACITY};
pub use entry::{CacheEntry, EntryStage, SweepAction, TokenGrant};
pub use metadata_cache::{
    global, CacheStats, CacheSweepReport, DynCollection, GlobalMetadataCache, MetadataCache,
};
pub use registry::{CacheLookup, Registry, SweepReport};
