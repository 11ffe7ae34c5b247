//! Bundle sources - where bundle files live on disk.
//!
//! Bundle names are forward-slash logical paths (`"ui/uiloginview.b"`). A
//! [`BundlePathProvider`] turns a name into the file that should be read.

use std::path::{Path, PathBuf};

/// Resolves a bundle name to a file path.
pub trait BundlePathProvider: Send + Sync + 'static {
    /// The path the bundle should be read from.
    fn bundle_path(&self, bundle: &str) -> PathBuf;

    /// Check if the bundle can be read at all.
    fn exists(&self, bundle: &str) -> bool {
        self.bundle_path(bundle).is_file()
    }
}

/// Looks in a writable persistent root first (downloaded or patched bundles)
/// and falls back to the read-only native root shipped with the application.
#[derive(Debug, Clone)]
pub struct DefaultBundlePathProvider {
    persistent_root: Option<PathBuf>,
    native_root: PathBuf,
}

impl DefaultBundlePathProvider {
    /// Resolve everything against `native_root`.
    pub fn new(native_root: impl AsRef<Path>) -> Self {
        Self {
            persistent_root: None,
            native_root: native_root.as_ref().to_path_buf(),
        }
    }

    /// Prefer bundles found under `persistent_root`.
    pub fn with_persistent_root(mut self, persistent_root: impl AsRef<Path>) -> Self {
        self.persistent_root = Some(persistent_root.as_ref().to_path_buf());
        self
    }

    /// The fallback root.
    pub fn native_root(&self) -> &Path {
        &self.native_root
    }

    /// The preferred root, if configured.
    pub fn persistent_root(&self) -> Option<&Path> {
        self.persistent_root.as_deref()
    }
}

impl BundlePathProvider for DefaultBundlePathProvider {
    fn bundle_path(&self, bundle: &str) -> PathBuf {
        if let Some(root) = &self.persistent_root {
            let candidate = root.join(bundle);
            if candidate.is_file() {
                return candidate;
            }
        }
        self.native_root.join(bundle)
    }
}

/// Lets the host pick a base directory per bundle, deferring to an inner
/// provider when the override returns `None`.
///
/// ```
/// use std::path::PathBuf;
/// use bundlekit_assets::{BundlePathProvider, DefaultBundlePathProvider, OverridePathProvider};
///
/// let native = DefaultBundlePathProvider::new("/opt/game");
/// let paths = OverridePathProvider::new(native, |bundle: &str| {
///     bundle.starts_with("dlc/").then(|| PathBuf::from("/mnt/dlc"))
/// });
///
/// assert_eq!(paths.bundle_path("dlc/map.b"), PathBuf::from("/mnt/dlc/dlc/map.b"));
/// assert_eq!(paths.bundle_path("ui/hud.b"), PathBuf::from("/opt/game/ui/hud.b"));
/// ```
pub struct OverridePathProvider<P, F> {
    inner: P,
    base_for: F,
}

impl<P, F> OverridePathProvider<P, F>
where
    P: BundlePathProvider,
    F: Fn(&str) -> Option<PathBuf> + Send + Sync + 'static,
{
    /// Wrap `inner` with a per-bundle base directory override.
    pub fn new(inner: P, base_for: F) -> Self {
        Self { inner, base_for }
    }
}

impl<P, F> BundlePathProvider for OverridePathProvider<P, F>
where
    P: BundlePathProvider,
    F: Fn(&str) -> Option<PathBuf> + Send + Sync + 'static,
{
    fn bundle_path(&self, bundle: &str) -> PathBuf {
        match (self.base_for)(bundle) {
            Some(base) => base.join(bundle),
            None => self.inner.bundle_path(bundle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_root_fallback() {
        let native = tempfile::tempdir().unwrap();
        let persistent = tempfile::tempdir().unwrap();
        let paths = DefaultBundlePathProvider::new(native.path())
            .with_persistent_root(persistent.path());

        assert_eq!(paths.bundle_path("ui/a.b"), native.path().join("ui/a.b"));
        assert!(!paths.exists("ui/a.b"));
    }

    #[test]
    fn test_persistent_root_preferred() {
        let native = tempfile::tempdir().unwrap();
        let persistent = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(persistent.path().join("ui")).unwrap();
        std::fs::write(persistent.path().join("ui/a.b"), b"patched").unwrap();
        std::fs::create_dir_all(native.path().join("ui")).unwrap();
        std::fs::write(native.path().join("ui/a.b"), b"shipped").unwrap();

        let paths = DefaultBundlePathProvider::new(native.path())
            .with_persistent_root(persistent.path());
        assert_eq!(paths.bundle_path("ui/a.b"), persistent.path().join("ui/a.b"));
        assert!(paths.exists("ui/a.b"));
    }
}
