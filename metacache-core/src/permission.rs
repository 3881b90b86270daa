//! Read permissions captured at build time.
//!
//! A build records every filesystem path it had to read. A later cache hit
//! may come from a different security context than the one that performed
//! the I/O, so the captured [`ReadPermission`] is demanded again on every
//! hit through the caller's [`ReadAuthorizer`].

use crate::error::AuthorizationError;
use std::path::{Component, Path, PathBuf};

/// Decides whether the current context may read a path.
pub trait ReadAuthorizer: Send + Sync {
    /// Demand read access to `path`.
    fn demand_read(&self, path: &Path) -> Result<(), AuthorizationError>;
}

/// Authorizer that grants every read.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl ReadAuthorizer for Unrestricted {
    fn demand_read(&self, _path: &Path) -> Result<(), AuthorizationError> {
        Ok(())
    }
}

/// Authorizer that grants reads below a fixed set of root directories.
#[derive(Debug, Clone, Default)]
pub struct RootedAuthorizer {
    roots: Vec<PathBuf>,
}

impl RootedAuthorizer {
    /// Create an authorizer for the given roots.
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    /// Add another permitted root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// The permitted roots.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Resolve `.` and `..` lexically, without touching the filesystem.
///
/// Returns `None` for a relative path that climbs above its starting point.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                } else if !path.has_root() {
                    return None;
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
        }
    }
    Some(normalized)
}

impl ReadAuthorizer for RootedAuthorizer {
    fn demand_read(&self, path: &Path) -> Result<(), AuthorizationError> {
        let allowed = normalize(path).is_some_and(|path| {
            self.roots
                .iter()
                .filter_map(|root| normalize(root))
                .any(|root| path.starts_with(root))
        });
        if allowed {
            Ok(())
        } else {
            Err(AuthorizationError::ReadDenied {
                path: path.to_path_buf(),
            })
        }
    }
}

/// Paths that required read authorization to build an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadPermission {
    paths: Vec<PathBuf>,
}

impl ReadPermission {
    /// A permission that demands nothing (e.g. embedded artifacts only).
    pub fn none() -> Self {
        Self::default()
    }

    /// Capture the given paths.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Captured paths.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Demand read access to every captured path, failing on the first denial.
    pub fn demand(&self, authorizer: &dyn ReadAuthorizer) -> Result<(), AuthorizationError> {
        for path in &self.paths {
            authorizer.demand_read(path)?;
        }
        Ok(())
    }
}
