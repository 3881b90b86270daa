//! Artifact loaders and their memoizer.
//!
//! A raw artifact path string such as `res://Models/model.csdl|/srv/app/db`
//! resolves to an ordered list of [`ArtifactLoader`]s. Resolution is cheap
//! but repeated on every workspace construction, so [`ArtifactLoaderCache`]
//! memoizes it by the exact raw string. The memo is unbounded and only
//! invalidated by replacing the whole cache.

use dashmap::DashMap;
use metacache_core::constants::{ARTIFACT_EXTENSIONS, EMBEDDED_RESOURCE_SCHEME, LOCATION_SEPARATOR};
use metacache_core::{ReadPermission, ResolveError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One resolved artifact location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLoader {
    /// A single schema artifact file.
    File(PathBuf),
    /// A directory whose schema artifacts are read as a set.
    Directory(PathBuf),
    /// A resource embedded in a named assembly; `resource` of `None` means
    /// every schema resource of that assembly.
    Embedded {
        assembly: String,
        resource: Option<String>,
    },
}

impl ArtifactLoader {
    /// Filesystem path that needs read authorization, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            ArtifactLoader::File(path) | ArtifactLoader::Directory(path) => Some(path),
            ArtifactLoader::Embedded { .. } => None,
        }
    }

    /// Schema artifact files this loader reads, in name order.
    ///
    /// Embedded resources have no files and yield an empty list.
    pub fn artifact_files(&self) -> Result<Vec<PathBuf>, ResolveError> {
        match self {
            ArtifactLoader::File(path) => Ok(vec![path.clone()]),
            ArtifactLoader::Directory(dir) => {
                let read = std::fs::read_dir(dir).map_err(|_| ResolveError::NotFound {
                    path: dir.clone(),
                })?;
                let mut files: Vec<PathBuf> = read
                    .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                    .filter(|path| path.is_file() && has_artifact_extension(path))
                    .collect();
                files.sort();
                Ok(files)
            }
            ArtifactLoader::Embedded { .. } => Ok(Vec::new()),
        }
    }
}

impl fmt::Display for ArtifactLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactLoader::File(path) | ArtifactLoader::Directory(path) => {
                write!(f, "{}", path.display())
            }
            ArtifactLoader::Embedded { assembly, resource } => match resource {
                Some(resource) => write!(f, "{EMBEDDED_RESOURCE_SCHEME}{assembly}/{resource}"),
                None => write!(f, "{EMBEDDED_RESOURCE_SCHEME}{assembly}"),
            },
        }
    }
}

/// Read permission covering every filesystem location in `loaders`.
pub fn read_permission_for(loaders: &[ArtifactLoader]) -> ReadPermission {
    ReadPermission::new(loaders.iter().filter_map(|loader| loader.path()))
}

fn has_artifact_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ARTIFACT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Turns a raw artifact path string into loaders.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, raw: &str) -> Result<Vec<ArtifactLoader>, ResolveError>;
}

/// Resolver for `|`-separated lists of files, directories and
/// `res://assembly[/resource]` locations.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathListResolver;

impl PathListResolver {
    fn resolve_one(location: &str) -> Result<ArtifactLoader, ResolveError> {
        if let Some(rest) = location.strip_prefix(EMBEDDED_RESOURCE_SCHEME) {
            let (assembly, resource) = match rest.split_once('/') {
                Some((assembly, resource)) if !resource.is_empty() => {
                    (assembly, Some(resource.to_string()))
                }
                Some((assembly, _)) => (assembly, None),
                None => (rest, None),
            };
            if assembly.is_empty() {
                return Err(ResolveError::UnsupportedLocation {
                    location: location.to_string(),
                    reason: "embedded resource location names no assembly".to_string(),
                });
            }
            return Ok(ArtifactLoader::Embedded {
                assembly: assembly.to_string(),
                resource,
            });
        }

        let path = PathBuf::from(location);
        if path.is_dir() {
            Ok(ArtifactLoader::Directory(path))
        } else if path.is_file() {
            if has_artifact_extension(&path) {
                Ok(ArtifactLoader::File(path))
            } else {
                Err(ResolveError::UnsupportedLocation {
                    location: location.to_string(),
                    reason: format!("expected one of {:?}", ARTIFACT_EXTENSIONS),
                })
            }
        } else {
            Err(ResolveError::NotFound { path })
        }
    }
}

impl ArtifactResolver for PathListResolver {
    fn resolve(&self, raw: &str) -> Result<Vec<ArtifactLoader>, ResolveError> {
        let loaders = raw
            .split(LOCATION_SEPARATOR)
            .map(str::trim)
            .filter(|location| !location.is_empty())
            .map(Self::resolve_one)
            .collect::<Result<Vec<_>, _>>()?;

        if loaders.is_empty() {
            return Err(ResolveError::EmptyLocation);
        }
        Ok(loaders)
    }
}

/// Unbounded memo from raw path strings to resolved loaders.
///
/// Only successful resolutions are kept.
pub struct ArtifactLoaderCache {
    resolver: Arc<dyn ArtifactResolver>,
    loaders: DashMap<String, Arc<[ArtifactLoader]>>,
}

impl ArtifactLoaderCache {
    pub fn new(resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            resolver,
            loaders: DashMap::new(),
        }
    }

    /// Resolve `raw`, reusing an earlier resolution of the identical string.
    pub fn get_or_resolve(&self, raw: &str) -> Result<Arc<[ArtifactLoader]>, ResolveError> {
        if let Some(loaders) = self.loaders.get(raw) {
            return Ok(Arc::clone(loaders.value()));
        }

        let resolved: Arc<[ArtifactLoader]> = self.resolver.resolve(raw)?.into();
        let entry = self
            .loaders
            .entry(raw.to_string())
            .or_insert_with(|| Arc::clone(&resolved));
        Ok(Arc::clone(entry.value()))
    }

    /// A fresh, empty memo sharing this cache's resolver.
    pub fn fresh(&self) -> Self {
        Self::new(Arc::clone(&self.resolver))
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl Default for ArtifactLoaderCache {
    fn default() -> Self {
        Self::new(Arc::new(PathListResolver))
    }
}

impl fmt::Debug for ArtifactLoaderCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactLoaderCache")
            .field("memoized", &self.loaders.len())
            .finish()
    }
}
