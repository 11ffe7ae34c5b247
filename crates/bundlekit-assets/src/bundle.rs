//! The contract between the cache and a loaded bundle payload.

use std::any::Any;
use std::sync::Arc;

use bundlekit_core::alloc::HashMap;

/// A type-erased asset as it comes out of a bundle.
pub type ErasedAsset = Arc<dyn Any + Send + Sync>;

/// Trait for values that can be extracted from bundles and handed out
/// through [`AssetHandle`](crate::AssetHandle)s.
pub trait Asset: Send + Sync + 'static {
    /// Human-readable type name, used in error messages.
    fn type_name() -> &'static str;
}

impl Asset for String {
    fn type_name() -> &'static str {
        "String"
    }
}

impl Asset for Vec<u8> {
    fn type_name() -> &'static str {
        "Vec<u8>"
    }
}

/// A loaded bundle payload.
///
/// The cache never looks inside a bundle beyond asking it for a named asset.
/// Returning `None` means the bundle has no asset by that name; the type of a
/// returned asset is checked by the cache against what the caller asked for.
pub trait Bundle: Send + Sync + 'static {
    /// Extract the asset called `name`.
    fn extract(&self, name: &str) -> Option<ErasedAsset>;

    /// Names of the assets in this bundle, for diagnostics.
    fn asset_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A bundle held entirely in memory.
///
/// # Example
///
/// ```
/// use bundlekit_assets::{Bundle, MemoryBundle};
///
/// let bundle = MemoryBundle::new().with_asset("greeting", String::from("hello"));
/// assert!(bundle.extract("greeting").is_some());
/// assert!(bundle.extract("missing").is_none());
/// ```
#[derive(Default)]
pub struct MemoryBundle {
    assets: HashMap<String, ErasedAsset>,
}

impl MemoryBundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset, builder style.
    pub fn with_asset<T: Asset>(mut self, name: impl Into<String>, asset: T) -> Self {
        self.insert(name, asset);
        self
    }

    /// Add or replace an asset.
    pub fn insert<T: Asset>(&mut self, name: impl Into<String>, asset: T) {
        self.assets.insert(name.into(), Arc::new(asset));
    }

    /// Number of assets in the bundle.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if the bundle has no assets.
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl Bundle for MemoryBundle {
    fn extract(&self, name: &str) -> Option<ErasedAsset> {
        self.assets.get(name).cloned()
    }

    fn asset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.assets.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for MemoryBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBundle")
            .field("assets", &self.asset_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_keeps_concrete_type() {
        let bundle = MemoryBundle::new()
            .with_asset("title", String::from("Login"))
            .with_asset("icon", vec![1u8, 2, 3]);

        let title = bundle.extract("title").unwrap();
        assert_eq!(title.downcast_ref::<String>().map(String::as_str), Some("Login"));
        assert!(title.downcast_ref::<Vec<u8>>().is_none());

        assert_eq!(bundle.asset_names(), vec!["icon", "title"]);
    }
}
