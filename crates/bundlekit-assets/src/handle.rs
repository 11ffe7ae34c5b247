//! Asset handles - one retained reference to a cached asset.
//!
//! A handle is the only way to give a reference back to the cache. Dropping
//! it (or calling [`AssetHandle::dispose`]) releases the reference exactly
//! once.

use std::sync::{Arc, Weak};

use crate::Asset;
use crate::cache::{AssetKey, CacheInner};

/// The right to release one reference on a cache entry.
///
/// Consumed by [`Lease::release`], so it cannot be used twice.
pub(crate) struct Lease {
    cache: Weak<CacheInner>,
    id: u64,
}

impl Lease {
    pub(crate) fn new(cache: &Arc<CacheInner>, id: u64) -> Self {
        Self {
            cache: Arc::downgrade(cache),
            id,
        }
    }

    fn release(self, key: &AssetKey) {
        // A cache that is already gone has nothing left to release.
        if let Some(cache) = self.cache.upgrade() {
            cache.release_entry(key, self.id);
        }
    }
}

/// A typed, reference-counted handle to a loaded asset.
///
/// Each handle accounts for one reference on its cache entry. The entry, and
/// the retain it holds on the owning bundle, stay alive until every handle
/// is gone.
///
/// # Example
///
/// ```ignore
/// let mut handle: AssetHandle<Texture> = system
///     .load_asset("ui/uiloginview.b", "UILoginView", Duration::from_secs(5))
///     .await?;
///
/// if let Some(texture) = handle.asset() {
///     // Use the texture...
/// }
///
/// // Explicit release; dropping the handle does the same.
/// handle.dispose();
/// assert!(!handle.is_ready());
/// ```
pub struct AssetHandle<T: Asset> {
    key: AssetKey,
    asset: Option<Arc<T>>,
    lease: Option<Lease>,
}

impl<T: Asset> AssetHandle<T> {
    pub(crate) fn new(key: AssetKey, asset: Arc<T>, lease: Lease) -> Self {
        Self {
            key,
            asset: Some(asset),
            lease: Some(lease),
        }
    }

    /// Returns `true` until the handle is disposed.
    pub fn is_ready(&self) -> bool {
        self.asset.is_some()
    }

    /// The asset, or `None` once disposed.
    pub fn asset(&self) -> Option<&T> {
        self.asset.as_deref()
    }

    /// The shared asset, or `None` once disposed.
    ///
    /// Cloning the `Arc` keeps the value alive but not the cache entry or
    /// its bundle.
    pub fn get(&self) -> Option<&Arc<T>> {
        self.asset.as_ref()
    }

    /// The key this handle was issued for.
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// The bundle the asset came from.
    pub fn bundle(&self) -> &str {
        self.key.bundle()
    }

    /// The asset name within its bundle.
    pub fn name(&self) -> &str {
        self.key.asset()
    }

    /// Get the type name of the asset.
    pub fn type_name(&self) -> &'static str {
        T::type_name()
    }

    /// Release this handle's reference. Calling it again does nothing.
    pub fn dispose(&mut self) {
        self.asset = None;
        if let Some(lease) = self.lease.take() {
            lease.release(&self.key);
        }
    }
}

impl<T: Asset> Drop for AssetHandle<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<T: Asset> std::fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetHandle")
            .field("type", &T::type_name())
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}
