//! Asset cache - per-asset dedup, reference counting and timeout-bounded loads.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bundlekit_core::alloc::HashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::bundle::{Asset, ErasedAsset};
use crate::error::{LoadError, LoadResult};
use crate::event::CacheEvent;
use crate::handle::{AssetHandle, Lease};
use crate::state::{AssetEntry, AssetSnapshot, LoadState};
use crate::store::{BundleStore, EventSink};

pub(crate) type PendingAsset = Shared<BoxFuture<'static, LoadResult<ErasedAsset>>>;

/// Identifies a cached asset: the bundle it lives in and its name there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey {
    bundle: String,
    asset: String,
}

impl AssetKey {
    /// Create a key.
    pub fn new(bundle: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            bundle: bundle.into(),
            asset: asset.into(),
        }
    }

    /// The bundle name.
    pub fn bundle(&self) -> &str {
        &self.bundle
    }

    /// The asset name.
    pub fn asset(&self) -> &str {
        &self.asset
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bundle, self.asset)
    }
}

pub(crate) struct CacheInner {
    store: BundleStore,
    entries: Mutex<HashMap<AssetKey, AssetEntry>>,
    next_id: AtomicU64,
    events: EventSink,
}

/// Registry of extracted assets, keyed by `(bundle, asset)`.
///
/// The first request for a key creates an entry and starts one load: the
/// owning bundle is loaded through the [`BundleStore`] and the asset is
/// extracted from it. Every request made while that load is in flight waits
/// on the same operation. Each successful request returns an
/// [`AssetHandle`] worth one reference; when the last handle goes away the
/// entry is removed and its bundle released.
///
/// A cached entry holds exactly one retain on its bundle, however many
/// handles are outstanding.
#[derive(Clone)]
pub struct AssetCache {
    inner: Arc<CacheInner>,
}

impl AssetCache {
    /// Create a cache on top of `store`.
    pub fn new(store: BundleStore) -> Self {
        let events = store.events();
        Self {
            inner: Arc::new(CacheInner {
                store,
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Load `asset` from `bundle`, waiting at most `timeout`.
    ///
    /// On timeout the entry is evicted so the next request starts over. The
    /// load itself keeps running; if it completes later its result is
    /// discarded and its bundle retain returned.
    pub async fn load_asset<T: Asset>(
        &self,
        bundle: &str,
        asset: &str,
        timeout: Duration,
    ) -> LoadResult<AssetHandle<T>> {
        let key = AssetKey::new(bundle, asset);
        let started = Instant::now();

        loop {
            let (id, pending) = self.join_or_start(&key);

            if let Some(op) = pending {
                let remaining = timeout.saturating_sub(started.elapsed());
                match tokio::time::timeout(remaining, op).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(_) => {
                        // The load may have committed right at the deadline.
                        if let Some(result) = self.retain::<T>(&key, id, true) {
                            return result;
                        }
                        tracing::warn!(
                            key = %key,
                            ?timeout,
                            "asset load timed out, entry evicted"
                        );
                        self.inner.emit(CacheEvent::TimedOut {
                            bundle: key.bundle.clone(),
                            asset: key.asset.clone(),
                        });
                        return Err(LoadError::Timeout {
                            bundle: key.bundle,
                            asset: key.asset,
                            timeout,
                        });
                    }
                }
            }

            match self.retain::<T>(&key, id, false) {
                Some(result) => return result,
                None => {
                    tracing::debug!(
                        key = %key,
                        "asset entry evicted before it was retained, retrying"
                    );
                }
            }
        }
    }

    /// Find the entry for `key`, starting a load if there is none.
    ///
    /// Returns the entry id and, unless the asset is already present, the
    /// load to wait on.
    fn join_or_start(&self, key: &AssetKey) -> (u64, Option<PendingAsset>) {
        let mut entries = self.inner.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.asset.is_some() => (entry.id, None),
            Some(entry) if entry.pending.is_some() => {
                tracing::trace!(key = %key, "joining in-flight asset load");
                (entry.id, entry.pending.clone())
            }
            _ => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let op = self.spawn_load(key.clone(), id);
                entries.insert(key.clone(), AssetEntry::loading(id, op.clone()));
                tracing::debug!(key = %key, id, "asset load started");
                (id, Some(op))
            }
        }
    }

    fn spawn_load(&self, key: AssetKey, id: u64) -> PendingAsset {
        let task = tokio::spawn(Arc::clone(&self.inner).load_entry(key.clone(), id));
        let inner = Arc::clone(&self.inner);

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    tracing::error!(key = %key, error = %join_error, "load task aborted");
                    inner.evict_pending(&key, id);
                    Err(LoadError::Unknown {
                        bundle: key.bundle,
                        message: format!("asset load task failed: {join_error}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Take one reference on a committed entry.
    ///
    /// Returns `None` if entry `id` is gone or has not committed yet; with
    /// `evict_if_pending` an uncommitted entry is removed as well.
    fn retain<T: Asset>(
        &self,
        key: &AssetKey,
        id: u64,
        evict_if_pending: bool,
    ) -> Option<LoadResult<AssetHandle<T>>> {
        let mut entries = self.inner.entries.lock();
        let entry = match entries.get_mut(key) {
            Some(entry) if entry.id == id => entry,
            _ => return None,
        };

        let Some(asset) = entry.asset.clone() else {
            if evict_if_pending {
                entries.remove(key);
            }
            return None;
        };

        match asset.downcast::<T>() {
            Ok(typed) => {
                entry.refcount += 1;
                tracing::trace!(key = %key, refcount = entry.refcount, "asset retained");
                drop(entries);
                Some(Ok(AssetHandle::new(key.clone(), typed, Lease::new(&self.inner, id))))
            }
            Err(_) => {
                let orphaned = entry.refcount == 0;
                let bundle_epoch = entry.bundle_epoch;
                if orphaned {
                    entries.remove(key);
                }
                drop(entries);

                if orphaned {
                    self.inner.store.release_in_epoch(&key.bundle, bundle_epoch);
                }
                Some(Err(LoadError::TypeMismatch {
                    bundle: key.bundle.clone(),
                    asset: key.asset.clone(),
                    expected: T::type_name(),
                }))
            }
        }
    }

    /// Retain an asset that is already cached, without any I/O.
    ///
    /// Returns `None` if the asset is not cached (or still loading), or is
    /// not a `T`.
    pub fn try_get_loaded<T: Asset>(&self, bundle: &str, asset: &str) -> Option<AssetHandle<T>> {
        let key = AssetKey::new(bundle, asset);
        let mut entries = self.inner.entries.lock();
        let entry = entries.get_mut(&key)?;
        let typed = entry.asset.clone()?.downcast::<T>().ok()?;

        entry.refcount += 1;
        tracing::trace!(key = %key, refcount = entry.refcount, "asset retained from cache");
        let id = entry.id;
        drop(entries);

        Some(AssetHandle::new(key, typed, Lease::new(&self.inner, id)))
    }

    /// Drop every entry and unload every bundle.
    ///
    /// Handles still held afterwards release nothing when dropped.
    pub fn unload_all(&self) {
        let evicted = std::mem::take(&mut *self.inner.entries.lock()).len();
        self.inner.store.unload_all();
        tracing::info!(evicted, "asset cache cleared");
    }

    /// Outstanding handles for a cached asset.
    pub fn ref_count(&self, bundle: &str, asset: &str) -> Option<usize> {
        self.inner
            .entries
            .lock()
            .get(&AssetKey::new(bundle, asset))
            .map(|entry| entry.refcount)
    }

    /// Load state of a cache entry.
    pub fn state(&self, bundle: &str, asset: &str) -> LoadState {
        self.inner
            .entries
            .lock()
            .get(&AssetKey::new(bundle, asset))
            .map_or(LoadState::NotLoaded, AssetEntry::state)
    }

    /// Number of cache entries, loaded or loading.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Check if the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Cache entries sorted by key.
    pub fn snapshot(&self) -> Vec<AssetSnapshot> {
        let entries = self.inner.entries.lock();
        let mut assets: Vec<AssetSnapshot> = entries
            .iter()
            .map(|(key, entry)| AssetSnapshot {
                bundle: key.bundle.clone(),
                asset: key.asset.clone(),
                refcount: entry.refcount,
                state: entry.state(),
            })
            .collect();
        assets.sort_by(|a, b| (&a.bundle, &a.asset).cmp(&(&b.bundle, &b.asset)));
        assets
    }

    /// The bundle store underneath.
    pub fn store(&self) -> &BundleStore {
        &self.inner.store
    }
}

impl CacheInner {
    async fn load_entry(self: Arc<Self>, key: AssetKey, id: u64) -> LoadResult<ErasedAsset> {
        let result = match self.store.load_bundle(&key.bundle).await {
            Ok(bundle) => match bundle.extract(&key.asset) {
                Some(asset) => Ok((asset, bundle.epoch())),
                None => {
                    self.store.release_in_epoch(&key.bundle, bundle.epoch());
                    Err(LoadError::AssetNotFound {
                        bundle: key.bundle.clone(),
                        asset: key.asset.clone(),
                    })
                }
            },
            Err(err) => Err(err),
        };

        self.commit(&key, id, result)
    }

    /// Publish the outcome of an asset load. A success carries the store
    /// epoch of the bundle retain it took.
    fn commit(
        &self,
        key: &AssetKey,
        id: u64,
        result: LoadResult<(ErasedAsset, u64)>,
    ) -> LoadResult<ErasedAsset> {
        let mut entries = self.entries.lock();
        let current = entries.get(key).is_some_and(|entry| entry.id == id);

        match result {
            Ok((asset, bundle_epoch)) if current => {
                if let Some(entry) = entries.get_mut(key) {
                    entry.asset = Some(Arc::clone(&asset));
                    entry.bundle_epoch = bundle_epoch;
                    entry.pending = None;
                }
                drop(entries);

                tracing::debug!(key = %key, "asset loaded");
                self.emit(CacheEvent::AssetLoaded {
                    bundle: key.bundle.clone(),
                    asset: key.asset.clone(),
                });
                Ok(asset)
            }
            Ok((asset, bundle_epoch)) => {
                drop(entries);

                // Evicted by a timeout or teardown while loading.
                tracing::debug!(key = %key, "late asset load discarded");
                self.store.release_in_epoch(&key.bundle, bundle_epoch);
                Ok(asset)
            }
            Err(err) => {
                if current {
                    entries.remove(key);
                }
                drop(entries);

                tracing::warn!(key = %key, error = %err, "asset load failed");
                self.emit(CacheEvent::LoadFailed {
                    bundle: key.bundle.clone(),
                    asset: Some(key.asset.clone()),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn evict_pending(&self, key: &AssetKey, id: u64) {
        let mut entries = self.entries.lock();
        if entries
            .get(key)
            .is_some_and(|entry| entry.id == id && entry.asset.is_none())
        {
            entries.remove(key);
        }
    }

    /// Return one handle's reference. At zero the entry is removed and its
    /// bundle released.
    pub(crate) fn release_entry(&self, key: &AssetKey, id: u64) {
        let bundle_epoch = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(key).filter(|entry| entry.id == id) else {
                tracing::trace!(key = %key, "release of evicted asset entry ignored");
                return;
            };

            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount > 0 {
                tracing::trace!(key = %key, refcount = entry.refcount, "asset handle released");
                return;
            }

            let bundle_epoch = entry.bundle_epoch;
            entry.asset = None;
            entries.remove(key);
            bundle_epoch
        };

        self.store.release_in_epoch(&key.bundle, bundle_epoch);
        tracing::debug!(key = %key, "asset released");
        self.emit(CacheEvent::AssetReleased {
            bundle: key.bundle.clone(),
            asset: key.asset.clone(),
        });
    }

    fn emit(&self, event: CacheEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::MemoryBundle;
    use crate::io::MemoryBundleLoader;
    use crate::manifest::DependencyManifest;
    use crate::scheduler::LoadScheduler;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn cache() -> AssetCache {
        let loader = MemoryBundleLoader::new()
            .with_bundle(
                "ui/login.b",
                MemoryBundle::new()
                    .with_asset("title", String::from("Welcome"))
                    .with_asset("logo", vec![0u8, 1, 2]),
            )
            .with_bundle("ui/common.b", MemoryBundle::new());
        let manifest = DependencyManifest::from_entries([("ui/login.b", ["ui/common.b"])]).unwrap();
        let store = BundleStore::new(Arc::new(manifest), Arc::new(loader), LoadScheduler::new(4));
        AssetCache::new(store)
    }

    #[test]
    fn test_asset_key_display() {
        assert_eq!(AssetKey::new("ui/login.b", "title").to_string(), "ui/login.b/title");
    }

    #[tokio::test]
    async fn test_handles_share_one_entry_and_one_bundle_retain() {
        let cache = cache();

        let a = cache.load_asset::<String>("ui/login.b", "title", TIMEOUT).await.unwrap();
        let b = cache.load_asset::<String>("ui/login.b", "title", TIMEOUT).await.unwrap();
        assert_eq!(a.asset().map(String::as_str), Some("Welcome"));
        assert_eq!(cache.ref_count("ui/login.b", "title"), Some(2));
        assert_eq!(cache.store().ref_count("ui/login.b"), Some(1));

        drop(a);
        assert_eq!(cache.ref_count("ui/login.b", "title"), Some(1));
        drop(b);
        assert!(cache.is_empty());
        assert_eq!(cache.store().resident_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_asset_evicts_entry_and_releases_bundle() {
        let cache = cache();

        let err = cache
            .load_asset::<String>("ui/login.b", "missing", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::AssetNotFound { .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.store().resident_count(), 0);
    }

    #[tokio::test]
    async fn test_type_mismatch_leaves_no_orphan() {
        let cache = cache();

        let err = cache
            .load_asset::<Vec<u8>>("ui/login.b", "title", TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::TypeMismatch { expected: "Vec<u8>", .. }));
        assert!(cache.is_empty());
        assert_eq!(cache.store().resident_count(), 0);
    }

    #[tokio::test]
    async fn test_try_get_loaded_fast_path() {
        let cache = cache();
        assert!(cache.try_get_loaded::<String>("ui/login.b", "title").is_none());

        let first = cache.load_asset::<String>("ui/login.b", "title", TIMEOUT).await.unwrap();
        let second = cache.try_get_loaded::<String>("ui/login.b", "title").unwrap();
        assert!(second.is_ready());
        assert_eq!(cache.ref_count("ui/login.b", "title"), Some(2));

        // Wrong type is simply not available.
        assert!(cache.try_get_loaded::<Vec<u8>>("ui/login.b", "title").is_none());
        assert_eq!(cache.ref_count("ui/login.b", "title"), Some(2));

        drop(first);
        drop(second);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unload_all_orphans_outstanding_handles() {
        let cache = cache();
        let handle = cache.load_asset::<String>("ui/login.b", "title", TIMEOUT).await.unwrap();

        cache.unload_all();
        assert!(cache.is_empty());
        assert_eq!(cache.store().resident_count(), 0);

        // Releasing after teardown touches nothing.
        drop(handle);
        assert_eq!(cache.store().resident_count(), 0);
    }
}
