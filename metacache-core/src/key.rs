//! Case-insensitive cache keys.
//!
//! A `CacheKey` names a set of artifact locations. Two keys that differ only
//! in letter case address the same entry, while `Display` keeps the spelling
//! the caller used.

use crate::constants::LOCATION_SEPARATOR;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Key identifying one entry within a tier.
#[derive(Debug, Clone)]
pub struct CacheKey {
    /// Spelling supplied by the caller
    original: String,
    /// Case-folded form used for equality and hashing
    folded: String,
}

impl CacheKey {
    /// Create a key from a raw string.
    pub fn new(raw: impl Into<String>) -> Self {
        let original = raw.into();
        let folded = original.to_lowercase();
        Self { original, folded }
    }

    /// Compose a key from an ordered list of artifact locations.
    ///
    /// Locations are joined with `|`, the same separator used by raw
    /// artifact path strings.
    pub fn from_locations<I, S>(locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        for (i, location) in locations.into_iter().enumerate() {
            if i > 0 {
                joined.push(LOCATION_SEPARATOR);
            }
            joined.push_str(location.as_ref());
        }
        Self::new(joined)
    }

    /// The key as the caller spelled it.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// The case-folded form used for comparisons.
    pub fn folded(&self) -> &str {
        &self.folded
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.folded == other.folded
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folded.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl From<&str> for CacheKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}
