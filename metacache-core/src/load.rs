//! Loader contract shared by both tiers.
//!
//! The cache never builds anything itself. A caller supplies a loader that
//! turns a key into a [`Loaded`] value: the built collection, the paths whose
//! read access it required, and (for the store tier) the auxiliary resource
//! the entry will own.

use crate::error::TeardownError;
use crate::permission::ReadPermission;
use std::sync::Arc;

/// A resource owned by a cache entry that must be explicitly torn down.
///
/// Teardown is sequenced by the cache and happens at most once per entry.
pub trait AuxiliaryResource: Send + Sync + 'static {
    /// Whether entries of this kind need teardown at all. Tiers whose
    /// resource is [`NoAuxiliary`] discard their map on reset instead of
    /// deferring teardown.
    const REQUIRES_TEARDOWN: bool = true;

    /// Release whatever the resource holds.
    fn teardown(&self) -> Result<(), TeardownError>;
}

/// Placeholder for tiers whose entries own no auxiliary resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoAuxiliary;

impl AuxiliaryResource for NoAuxiliary {
    const REQUIRES_TEARDOWN: bool = false;

    fn teardown(&self) -> Result<(), TeardownError> {
        Ok(())
    }
}

/// Output of a successful build.
pub struct Loaded<T: ?Sized, A = NoAuxiliary> {
    /// The built collection, shared with every caller of the key.
    pub collection: Arc<T>,
    /// Paths that required read authorization during the build.
    pub permission: ReadPermission,
    /// Resource owned by the entry for its lifetime.
    pub auxiliary: A,
}

impl<T: ?Sized> Loaded<T, NoAuxiliary> {
    pub fn new(collection: Arc<T>, permission: ReadPermission) -> Self {
        Self {
            collection,
            permission,
            auxiliary: NoAuxiliary,
        }
    }
}

impl<T: ?Sized, A> Loaded<T, A> {
    /// Build output for a tier whose entries own an auxiliary resource.
    pub fn with_auxiliary(collection: Arc<T>, permission: ReadPermission, auxiliary: A) -> Self {
        Self {
            collection,
            permission,
            auxiliary,
        }
    }
}
