//! Registry records and load-state reporting.

use std::sync::Arc;

use crate::bundle::{Bundle, ErasedAsset};

/// Load state of a bundle or asset, as seen by the registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Not resident and not being loaded.
    NotLoaded,

    /// A load is in flight.
    Loading,

    /// Resident and ready for use.
    Loaded,
}

impl LoadState {
    /// Returns `true` if the value is resident.
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }

    /// Returns `true` if a load is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }
}

/// A resident bundle owned by the [`BundleStore`](crate::BundleStore).
pub(crate) struct BundleRecord {
    pub(crate) payload: Arc<dyn Bundle>,
    /// Retains held by callers and by dependent bundles. Never zero while
    /// the record is registered.
    pub(crate) refcount: usize,
}

impl BundleRecord {
    pub(crate) fn new(payload: Arc<dyn Bundle>, refcount: usize) -> Self {
        debug_assert!(refcount > 0);
        Self { payload, refcount }
    }
}

/// An entry in the asset cache.
pub(crate) struct AssetEntry {
    /// Identifies this entry across eviction and re-creation of the same key.
    pub(crate) id: u64,
    /// Present once the load committed. Cleared when the count reaches zero.
    pub(crate) asset: Option<ErasedAsset>,
    /// Outstanding handles.
    pub(crate) refcount: usize,
    /// Store epoch of the bundle retain this entry holds once committed.
    pub(crate) bundle_epoch: u64,
    /// Set while the load is in flight.
    pub(crate) pending: Option<crate::cache::PendingAsset>,
}

impl AssetEntry {
    pub(crate) fn loading(id: u64, pending: crate::cache::PendingAsset) -> Self {
        Self {
            id,
            asset: None,
            refcount: 0,
            bundle_epoch: 0,
            pending: Some(pending),
        }
    }

    pub(crate) fn state(&self) -> LoadState {
        if self.asset.is_some() {
            LoadState::Loaded
        } else if self.pending.is_some() {
            LoadState::Loading
        } else {
            LoadState::NotLoaded
        }
    }
}

/// A resident bundle as reported by [`BundleStore::snapshot`](crate::BundleStore::snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSnapshot {
    /// The bundle name.
    pub name: String,
    /// Current reference count.
    pub refcount: usize,
}

/// A cached asset as reported by [`AssetCache::snapshot`](crate::AssetCache::snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSnapshot {
    /// The owning bundle.
    pub bundle: String,
    /// The asset name.
    pub asset: String,
    /// Outstanding handles.
    pub refcount: usize,
    /// Whether the asset is loaded or still loading.
    pub state: LoadState,
}

/// Everything the registries currently hold, sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// Resident bundles.
    pub bundles: Vec<BundleSnapshot>,
    /// Bundles with a load in flight.
    pub loading_bundles: Vec<String>,
    /// Cached asset entries.
    pub assets: Vec<AssetSnapshot>,
}

impl CacheSnapshot {
    /// Reference count of a resident bundle.
    pub fn bundle_refcount(&self, name: &str) -> Option<usize> {
        self.bundles
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.refcount)
    }

    /// Reference count of a cached asset.
    pub fn asset_refcount(&self, bundle: &str, asset: &str) -> Option<usize> {
        self.assets
            .iter()
            .find(|a| a.bundle == bundle && a.asset == asset)
            .map(|a| a.refcount)
    }
}
