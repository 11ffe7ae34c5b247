//! Error types for the bundle cache.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while loading bundles or assets.
///
/// `LoadError` is `Clone` because a single in-flight load hands the same
/// outcome to every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Storage has no payload for the requested bundle.
    #[error("bundle not found: {bundle}")]
    NotFound {
        /// The bundle name.
        bundle: String,
    },

    /// Storage returned a payload but it could not be turned into a bundle.
    #[error("bundle '{bundle}' is corrupt: {message}")]
    Corrupt {
        /// The bundle name.
        bundle: String,
        /// Description of the decode failure.
        message: String,
    },

    /// An asset load did not finish before its deadline.
    #[error("loading '{asset}' from '{bundle}' timed out after {timeout:?}")]
    Timeout {
        /// The bundle the asset lives in.
        bundle: String,
        /// The asset name.
        asset: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// A transitive dependency failed to load.
    #[error("bundle '{bundle}' could not load its dependency '{dependency}'")]
    DependencyFailure {
        /// The bundle whose load was aborted.
        bundle: String,
        /// The dependency that failed.
        dependency: String,
        /// Why the dependency failed.
        #[source]
        source: Box<LoadError>,
    },

    /// Any other failure surfacing from the loader boundary.
    #[error("[Bundle: {bundle}] {message}")]
    Unknown {
        /// The bundle being loaded.
        bundle: String,
        /// Error message.
        message: String,
    },

    /// The bundle loaded but does not contain the requested asset.
    #[error("asset '{asset}' not found in bundle '{bundle}'")]
    AssetNotFound {
        /// The bundle name.
        bundle: String,
        /// The asset name.
        asset: String,
    },

    /// The asset exists but is not of the requested type.
    #[error("asset '{asset}' in bundle '{bundle}' is not a {expected}")]
    TypeMismatch {
        /// The bundle name.
        bundle: String,
        /// The asset name.
        asset: String,
        /// The type the caller asked for.
        expected: &'static str,
    },

    /// `unload_all` ran while this bundle was still loading.
    #[error("bundle '{bundle}' was torn down while loading")]
    TornDown {
        /// The bundle name.
        bundle: String,
    },
}

impl LoadError {
    /// Map an I/O error from reading a bundle into the taxonomy.
    pub fn from_io(bundle: impl Into<String>, err: &io::Error) -> Self {
        let bundle = bundle.into();
        if err.kind() == io::ErrorKind::NotFound {
            LoadError::NotFound { bundle }
        } else {
            LoadError::Unknown {
                bundle,
                message: err.to_string(),
            }
        }
    }

    /// The bundle this error is attributed to.
    pub fn bundle(&self) -> &str {
        match self {
            LoadError::NotFound { bundle }
            | LoadError::Corrupt { bundle, .. }
            | LoadError::Timeout { bundle, .. }
            | LoadError::DependencyFailure { bundle, .. }
            | LoadError::Unknown { bundle, .. }
            | LoadError::AssetNotFound { bundle, .. }
            | LoadError::TypeMismatch { bundle, .. }
            | LoadError::TornDown { bundle } => bundle,
        }
    }

    /// Follow `DependencyFailure` chains down to the error that started them.
    pub fn root_cause(&self) -> &LoadError {
        let mut current = self;
        while let LoadError::DependencyFailure { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns `true` if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadError::Timeout { .. })
    }
}

/// Errors produced while setting up the asset system.
#[derive(Debug, Error)]
pub enum InitError {
    /// The manifest file could not be read.
    #[error("failed to read manifest '{}': {source}", path.display())]
    ManifestIo {
        /// The manifest path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A manifest or configuration is not valid JSON of the expected shape.
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The manifest declares a dependency cycle.
    #[error("dependency cycle in manifest: {}", cycle.join(" -> "))]
    DependencyCycle {
        /// The bundles forming the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// The configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for load operations.
pub type LoadResult<T> = Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_follows_dependency_chain() {
        let err = LoadError::DependencyFailure {
            bundle: "a".into(),
            dependency: "b".into(),
            source: Box::new(LoadError::DependencyFailure {
                bundle: "b".into(),
                dependency: "c".into(),
                source: Box::new(LoadError::NotFound { bundle: "c".into() }),
            }),
        };

        assert_eq!(err.bundle(), "a");
        assert!(matches!(err.root_cause(), LoadError::NotFound { bundle } if bundle == "c"));
    }

    #[test]
    fn test_from_io_maps_not_found() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            LoadError::from_io("ui/a.b", &missing),
            LoadError::NotFound { .. }
        ));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        let err = LoadError::from_io("ui/a.b", &denied);
        assert!(matches!(err, LoadError::Unknown { .. }));
        assert!(err.to_string().starts_with("[Bundle: ui/a.b]"));
    }

    #[test]
    fn test_cycle_display() {
        let err = InitError::DependencyCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle in manifest: a -> b -> a");
    }
}
