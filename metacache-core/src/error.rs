//! Error types for metacache operations

use crate::TierKind;
use std::path::PathBuf;
use thiserror::Error;

/// Build failures raised by an injected loader.
///
/// These are never cached: the entry stays unloaded and the next lookup
/// retries the build from scratch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Invalid artifact {location}: {reason}")]
    InvalidArtifact { location: String, reason: String },

    #[error("Schema validation failed: {reason}")]
    SchemaValidation { reason: String },

    #[error("I/O error reading {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },
}

/// Authorization failures, raised even on cache hits.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Read access denied for {}", path.display())]
    ReadDenied { path: PathBuf },
}

/// Artifact-location resolution failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Artifact location string is empty")]
    EmptyLocation,

    #[error("Unsupported artifact location {location}: {reason}")]
    UnsupportedLocation { location: String, reason: String },

    #[error("Artifact not found: {}", path.display())]
    NotFound { path: PathBuf },
}

/// Failure while tearing down an auxiliary resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Teardown of {resource} failed: {reason}")]
pub struct TeardownError {
    pub resource: String,
    pub reason: String,
}

/// Master error type for all metacache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Lock poisoned for {tier} tier")]
    LockPoisoned { tier: TierKind },

    #[error("Cached result for {key} was reclaimed while a token was held")]
    Reclaimed { key: String },
}

/// Result type alias for metacache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display_invalid_artifact() {
        let err = LoadError::InvalidArtifact {
            location: "modelA.csdl".to_string(),
            reason: "unexpected element".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("modelA.csdl"));
        assert!(msg.contains("unexpected element"));
    }

    #[test]
    fn test_authorization_error_display_includes_path() {
        let err = AuthorizationError::ReadDenied {
            path: PathBuf::from("/srv/models/modelA.csdl"),
        };
        assert_eq!(
            format!("{}", err),
            "Read access denied for /srv/models/modelA.csdl"
        );
    }

    #[test]
    fn test_cache_error_from_load_error() {
        let err: CacheError = LoadError::SchemaValidation {
            reason: "duplicate type".to_string(),
        }
        .into();
        assert!(matches!(err, CacheError::Load(_)));
        assert!(format!("{}", err).starts_with("Load error:"));
    }

    #[test]
    fn test_cache_error_lock_poisoned_names_tier() {
        let err = CacheError::LockPoisoned {
            tier: TierKind::Store,
        };
        assert_eq!(format!("{}", err), "Lock poisoned for store tier");
    }

    #[test]
    fn test_io_error_display_includes_path() {
        let err: CacheError = LoadError::Io {
            path: PathBuf::from("/srv/models/modelA.ssdl"),
            reason: "permission denied".to_string(),
        }
        .into();
        assert_eq!(
            format!("{}", err),
            "Load error: I/O error reading /srv/models/modelA.ssdl: permission denied"
        );
    }

    #[test]
    fn test_teardown_error_display() {
        let err = TeardownError {
            resource: "query cache".to_string(),
            reason: "already closed".to_string(),
        };
        assert_eq!(
            format!("{}", err),
            "Teardown of query cache failed: already closed"
        );
    }
}
