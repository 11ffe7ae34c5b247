//! The I/O boundary: turning bundle names into loaded payloads.

use std::sync::Arc;

use async_trait::async_trait;
use bundlekit_core::alloc::HashMap;

use crate::bundle::Bundle;
use crate::error::{LoadError, LoadResult};
use crate::source::BundlePathProvider;

/// Loads bundle payloads. The only component that performs physical I/O.
///
/// Failures should use [`LoadError::NotFound`] when storage has no payload
/// for the name and [`LoadError::Corrupt`] when a payload exists but cannot
/// be used. Anything else is reported as [`LoadError::Unknown`].
///
/// # Example
///
/// ```ignore
/// struct HttpLoader { client: Client }
///
/// #[async_trait]
/// impl BundleLoader for HttpLoader {
///     async fn load(&self, bundle: &str) -> LoadResult<Arc<dyn Bundle>> {
///         let bytes = self.client.get(bundle).await?;
///         decode(bundle, bytes)
///     }
/// }
/// ```
#[async_trait]
pub trait BundleLoader: Send + Sync + 'static {
    /// Load the payload for `bundle`.
    async fn load(&self, bundle: &str) -> LoadResult<Arc<dyn Bundle>>;

    /// Physically unload a payload that is no longer referenced.
    ///
    /// The default simply drops it.
    fn unload(&self, bundle: &str, payload: Arc<dyn Bundle>) {
        tracing::trace!(bundle, "dropping bundle payload");
        drop(payload);
    }
}

/// Turns the raw bytes of a bundle file into a payload.
pub trait BundleDecoder: Send + Sync + 'static {
    /// Decode `bytes` read for `bundle`. The error message ends up in
    /// [`LoadError::Corrupt`].
    fn decode(&self, bundle: &str, bytes: Vec<u8>) -> Result<Arc<dyn Bundle>, String>;
}

impl<F> BundleDecoder for F
where
    F: Fn(&str, Vec<u8>) -> Result<Arc<dyn Bundle>, String> + Send + Sync + 'static,
{
    fn decode(&self, bundle: &str, bytes: Vec<u8>) -> Result<Arc<dyn Bundle>, String> {
        self(bundle, bytes)
    }
}

/// Reads bundle files from disk and decodes them.
pub struct FileBundleLoader<D> {
    paths: Arc<dyn BundlePathProvider>,
    decoder: D,
}

impl<D: BundleDecoder> FileBundleLoader<D> {
    /// Create a loader resolving files through `paths`.
    pub fn new(paths: impl BundlePathProvider, decoder: D) -> Self {
        Self {
            paths: Arc::new(paths),
            decoder,
        }
    }

    /// The path provider used to locate bundle files.
    pub fn paths(&self) -> &dyn BundlePathProvider {
        self.paths.as_ref()
    }
}

#[async_trait]
impl<D: BundleDecoder> BundleLoader for FileBundleLoader<D> {
    async fn load(&self, bundle: &str) -> LoadResult<Arc<dyn Bundle>> {
        let path = self.paths.bundle_path(bundle);
        tracing::trace!(bundle, path = %path.display(), "reading bundle file");

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| LoadError::from_io(bundle, &err))?;

        self.decoder
            .decode(bundle, bytes)
            .map_err(|message| LoadError::Corrupt {
                bundle: bundle.to_string(),
                message,
            })
    }
}

/// Serves bundles that are already in memory (embedded content, tests).
#[derive(Default)]
pub struct MemoryBundleLoader {
    bundles: HashMap<String, Arc<dyn Bundle>>,
}

impl MemoryBundleLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bundle, builder style.
    pub fn with_bundle(mut self, name: impl Into<String>, bundle: impl Bundle) -> Self {
        self.insert(name, bundle);
        self
    }

    /// Add or replace a bundle.
    pub fn insert(&mut self, name: impl Into<String>, bundle: impl Bundle) {
        self.bundles.insert(name.into(), Arc::new(bundle));
    }

    /// Remove a bundle.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Bundle>> {
        self.bundles.remove(name)
    }

    /// Check if a bundle is available.
    pub fn contains(&self, name: &str) -> bool {
        self.bundles.contains_key(name)
    }
}

#[async_trait]
impl BundleLoader for MemoryBundleLoader {
    async fn load(&self, bundle: &str) -> LoadResult<Arc<dyn Bundle>> {
        self.bundles
            .get(bundle)
            .cloned()
            .ok_or_else(|| LoadError::NotFound {
                bundle: bundle.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::MemoryBundle;
    use crate::source::DefaultBundlePathProvider;

    fn text_decoder(_bundle: &str, bytes: Vec<u8>) -> Result<Arc<dyn Bundle>, String> {
        let text = String::from_utf8(bytes).map_err(|e| format!("Invalid UTF-8: {e}"))?;
        let mut bundle = MemoryBundle::new();
        for line in text.lines() {
            let (name, value) = line
                .split_once('=')
                .ok_or_else(|| format!("malformed line: {line}"))?;
            bundle.insert(name.trim(), value.trim().to_string());
        }
        Ok(Arc::new(bundle))
    }

    #[tokio::test]
    async fn test_file_loader_reads_and_decodes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("ui")).unwrap();
        std::fs::write(dir.path().join("ui/login.b"), "title = Welcome\n").unwrap();

        let paths = DefaultBundlePathProvider::new(dir.path());
        let loader = FileBundleLoader::new(paths, text_decoder);
        let bundle = loader.load("ui/login.b").await.unwrap();
        let title = bundle.extract("title").unwrap();
        assert_eq!(title.downcast_ref::<String>().unwrap(), "Welcome");
    }

    #[tokio::test]
    async fn test_file_loader_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DefaultBundlePathProvider::new(dir.path());
        let loader = FileBundleLoader::new(paths, text_decoder);

        let err = loader.load("ui/missing.b").await.err().unwrap();
        assert!(matches!(err, LoadError::NotFound { bundle } if bundle == "ui/missing.b"));
    }

    #[tokio::test]
    async fn test_file_loader_decode_failure_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.b"), [0xffu8, 0xfe, 0x00]).unwrap();
        let paths = DefaultBundlePathProvider::new(dir.path());
        let loader = FileBundleLoader::new(paths, text_decoder);

        let err = loader.load("broken.b").await.err().unwrap();
        assert!(matches!(err, LoadError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_memory_loader() {
        let loader = MemoryBundleLoader::new().with_bundle("a.b", MemoryBundle::new());
        assert!(loader.contains("a.b"));
        assert!(loader.load("a.b").await.is_ok());
        assert!(matches!(
            loader.load("b.b").await.err(),
            Some(LoadError::NotFound { .. })
        ));
    }
}
