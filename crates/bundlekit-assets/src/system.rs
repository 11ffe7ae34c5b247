//! Asset system - the entry point tying manifest, loader, store and cache together.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::Asset;
use crate::cache::AssetCache;
use crate::config::AssetSystemConfig;
use crate::error::{InitError, LoadResult};
use crate::event::{CacheEvent, CacheEventBuffer};
use crate::handle::AssetHandle;
use crate::io::BundleLoader;
use crate::manifest::ManifestSource;
use crate::scheduler::LoadScheduler;
use crate::state::CacheSnapshot;
use crate::store::{BundleStore, EventSink, LoadedBundle};

/// The asset system: one bundle store and one asset cache sharing a
/// dependency manifest, a loader and a load scheduler.
///
/// Cloning is cheap and every clone works on the same registries.
///
/// # Example
///
/// ```ignore
/// let system = AssetSystem::initialize(
///     AssetSystemConfig::default(),
///     ManifestSource::File("content/manifest.json".into()),
///     Arc::new(FileBundleLoader::new(paths, decode_bundle)),
/// )
/// .await?;
///
/// let view: AssetHandle<Prefab> = system
///     .load_asset("ui/uiloginview.b", "UILoginView", Duration::from_secs(5))
///     .await?;
///
/// for event in system.drain_events() {
///     tracing::debug!(?event, "cache event");
/// }
///
/// drop(view);
/// system.unload_all();
/// ```
#[derive(Clone)]
pub struct AssetSystem {
    config: Arc<AssetSystemConfig>,
    cache: AssetCache,
    events: EventSink,
}

impl AssetSystem {
    /// Validate `config`, load the dependency manifest and build the
    /// registries.
    ///
    /// Fails if the manifest cannot be read or parsed, declares a dependency
    /// cycle, or the configuration is out of range.
    pub async fn initialize(
        config: AssetSystemConfig,
        manifest: ManifestSource,
        loader: Arc<dyn BundleLoader>,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let manifest = manifest.load().await?;

        tracing::info!(
            bundles = manifest.len(),
            max_concurrency = config.max_concurrency,
            "asset system initialized"
        );

        let events: EventSink = Arc::new(Mutex::new(CacheEventBuffer::new(config.event_capacity)));
        let store = BundleStore::with_events(
            Arc::new(manifest),
            loader,
            LoadScheduler::new(config.max_concurrency),
            Arc::clone(&events),
        );

        Ok(Self {
            config: Arc::new(config),
            cache: AssetCache::new(store),
            events,
        })
    }

    /// Load `asset` from `bundle`, waiting at most `timeout`.
    ///
    /// See [`AssetCache::load_asset`].
    pub async fn load_asset<T: Asset>(
        &self,
        bundle: &str,
        asset: &str,
        timeout: Duration,
    ) -> LoadResult<AssetHandle<T>> {
        self.cache.load_asset(bundle, asset, timeout).await
    }

    /// Load an asset with the configured default timeout.
    pub async fn load_asset_default<T: Asset>(
        &self,
        bundle: &str,
        asset: &str,
    ) -> LoadResult<AssetHandle<T>> {
        self.cache
            .load_asset(bundle, asset, self.config.default_timeout())
            .await
    }

    /// Retain an already cached asset without suspending.
    pub fn try_get_loaded<T: Asset>(&self, bundle: &str, asset: &str) -> Option<AssetHandle<T>> {
        self.cache.try_get_loaded(bundle, asset)
    }

    /// Give a handle back. Same as dropping it.
    pub fn release_handle<T: Asset>(&self, handle: AssetHandle<T>) {
        drop(handle);
    }

    /// Make `bundle` and its dependencies resident without extracting an
    /// asset. Pair every success with [`release_bundle`](Self::release_bundle).
    pub async fn load_bundle(&self, bundle: &str) -> LoadResult<LoadedBundle> {
        self.cache.store().load_bundle(bundle).await
    }

    /// Return a reference taken by [`load_bundle`](Self::load_bundle).
    pub fn release_bundle(&self, bundle: &str) {
        self.cache.store().release(bundle);
    }

    /// Unload everything and clear both registries.
    ///
    /// Outstanding handles stay readable; releasing them afterwards does
    /// nothing.
    pub fn unload_all(&self) {
        self.cache.unload_all();
    }

    /// What the registries currently hold.
    pub fn snapshot(&self) -> CacheSnapshot {
        let (bundles, loading_bundles) = self.cache.store().snapshot();
        CacheSnapshot {
            bundles,
            loading_bundles,
            assets: self.cache.snapshot(),
        }
    }

    /// Take all buffered lifecycle events, oldest first.
    pub fn drain_events(&self) -> Vec<CacheEvent> {
        self.events.lock().drain()
    }

    /// The active configuration.
    pub fn config(&self) -> &AssetSystemConfig {
        &self.config
    }

    /// The asset cache.
    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    /// The bundle store.
    pub fn store(&self) -> &BundleStore {
        self.cache.store()
    }
}

static_assertions::assert_impl_all!(AssetSystem: Send, Sync, Clone);
static_assertions::assert_impl_all!(AssetHandle<String>: Send, Sync);
static_assertions::assert_impl_all!(crate::LoadError: Send, Sync, Clone);
