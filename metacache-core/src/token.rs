//! Liveness tokens.
//!
//! A `CacheToken` carries no data. Callers embed it in their own long-lived
//! state; the cache keeps only a [`WeakToken`] and treats "the token is still
//! reachable" as the sole signal that an entry is in use.
//!
//! Cloning a token shares the same instance. The cache hands the same token
//! to every caller that looks up a key while that token is alive, so it can
//! tell whether *anyone* still uses an entry, never how many callers do.

use std::fmt;
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct TokenMarker;

/// Opaque liveness handle returned by every cache lookup.
#[derive(Clone)]
pub struct CacheToken {
    marker: Arc<TokenMarker>,
}

impl CacheToken {
    /// Issue a brand-new token instance.
    pub fn issue() -> Self {
        Self {
            marker: Arc::new(TokenMarker),
        }
    }

    /// Weak handle the cache stores in place of the token itself.
    pub fn downgrade(&self) -> WeakToken {
        WeakToken {
            marker: Arc::downgrade(&self.marker),
        }
    }

    /// Whether two handles refer to the same token instance.
    pub fn ptr_eq(&self, other: &CacheToken) -> bool {
        Arc::ptr_eq(&self.marker, &other.marker)
    }
}

impl fmt::Debug for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheToken")
            .field("id", &Arc::as_ptr(&self.marker))
            .finish()
    }
}

/// Non-owning view of a [`CacheToken`].
#[derive(Clone, Default)]
pub struct WeakToken {
    marker: Weak<TokenMarker>,
}

impl WeakToken {
    /// A weak token that was never attached to a live token.
    pub fn dangling() -> Self {
        Self::default()
    }

    /// Recover the token if some caller still holds it.
    pub fn upgrade(&self) -> Option<CacheToken> {
        self.marker.upgrade().map(|marker| CacheToken { marker })
    }

    /// Whether the token is still reachable.
    pub fn is_alive(&self) -> bool {
        self.marker.strong_count() > 0
    }
}

impl fmt::Debug for WeakToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakToken")
            .field("alive", &self.is_alive())
            .finish()
    }
}
