//! metacache Core - Shared Types
//!
//! Keys, liveness tokens, read permissions, the error taxonomy and the
//! configuration surface shared by every metacache crate. This crate holds
//! no cache logic; the registries and the sweeper live in `metacache-storage`.

pub mod config;
pub mod constants;
pub mod error;
pub mod key;
pub mod load;
pub mod permission;
pub mod token;

pub use config::CacheConfig;
pub use error::{
    AuthorizationError, CacheError, CacheResult, LoadError, ResolveError, TeardownError,
};
pub use key::CacheKey;
pub use load::{AuxiliaryResource, Loaded, NoAuxiliary};
pub use permission::{ReadAuthorizer, ReadPermission, RootedAuthorizer, Unrestricted};
pub use token::{CacheToken, WeakToken};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two independent key namespaces of the metadata cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierKind {
    /// Conceptual schema graphs (one per set of schema artifacts).
    SchemaGraph,
    /// Store schemas and their mappings; entries own an auxiliary query cache.
    Store,
}

impl TierKind {
    /// Stable lowercase name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::SchemaGraph => "schema_graph",
            TierKind::Store => "store",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
