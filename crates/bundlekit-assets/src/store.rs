//! Bundle store - resident bundles, dependency loading and cascading release.

use std::sync::Arc;

use bundlekit_core::alloc::HashMap;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;

use crate::bundle::{Bundle, ErasedAsset};
use crate::error::{LoadError, LoadResult};
use crate::event::{CacheEvent, CacheEventBuffer};
use crate::io::BundleLoader;
use crate::manifest::DependencyManifest;
use crate::scheduler::LoadScheduler;
use crate::state::{BundleRecord, BundleSnapshot, LoadState};

pub(crate) type EventSink = Arc<Mutex<CacheEventBuffer>>;

type SharedLoad = Shared<BoxFuture<'static, LoadResult<Arc<dyn Bundle>>>>;

/// A load in flight, shared by everyone who asked for the bundle meanwhile.
struct InFlight {
    op: SharedLoad,
    /// Callers awaiting `op`; becomes the record's count when it commits.
    waiters: usize,
}

#[derive(Default)]
struct StoreState {
    resident: HashMap<String, BundleRecord>,
    in_flight: HashMap<String, InFlight>,
    /// Bumped by `unload_all` so loads started before teardown do not commit.
    epoch: u64,
}

struct StoreInner {
    manifest: Arc<DependencyManifest>,
    loader: Arc<dyn BundleLoader>,
    scheduler: LoadScheduler,
    state: Mutex<StoreState>,
    events: EventSink,
}

/// A bundle handed back by [`BundleStore::load_bundle`].
///
/// Holding a `LoadedBundle` does not keep the bundle resident; the retain it
/// stands for is returned with [`BundleStore::release`].
#[derive(Clone)]
pub struct LoadedBundle {
    name: String,
    payload: Arc<dyn Bundle>,
    /// Store epoch the retain was taken in.
    epoch: u64,
}

impl LoadedBundle {
    /// The bundle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The loaded payload.
    pub fn payload(&self) -> &Arc<dyn Bundle> {
        &self.payload
    }

    /// Extract a named asset from the payload.
    pub fn extract(&self, asset: &str) -> Option<ErasedAsset> {
        self.payload.extract(asset)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl std::fmt::Debug for LoadedBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBundle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Registry of resident bundles.
///
/// Loading a bundle first loads all of its direct dependencies (each of which
/// loads its own), so a bundle is never resident before everything it
/// depends on. Every successful [`load_bundle`](Self::load_bundle) retains
/// one reference; [`release`](Self::release) returns it, and a bundle whose
/// count reaches zero is unloaded and releases its dependencies in turn.
///
/// Concurrent requests for the same bundle share one physical load.
///
/// Loads run on the ambient tokio runtime. Dropping a `load_bundle` future
/// before it resolves does not cancel the load, and the retain it would
/// have returned is kept.
#[derive(Clone)]
pub struct BundleStore {
    inner: Arc<StoreInner>,
}

impl BundleStore {
    /// Create a store over `loader`, resolving dependencies with `manifest`.
    pub fn new(
        manifest: Arc<DependencyManifest>,
        loader: Arc<dyn BundleLoader>,
        scheduler: LoadScheduler,
    ) -> Self {
        let events = Arc::new(Mutex::new(CacheEventBuffer::new(0)));
        Self::with_events(manifest, loader, scheduler, events)
    }

    pub(crate) fn with_events(
        manifest: Arc<DependencyManifest>,
        loader: Arc<dyn BundleLoader>,
        scheduler: LoadScheduler,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                manifest,
                loader,
                scheduler,
                state: Mutex::new(StoreState::default()),
                events,
            }),
        }
    }

    /// Load `name` and its dependencies, retaining one reference.
    ///
    /// A resident bundle is returned without suspending. If a load of `name`
    /// is already in flight the caller joins it and sees the same outcome.
    pub fn load_bundle(&self, name: &str) -> BoxFuture<'static, LoadResult<LoadedBundle>> {
        let store = self.clone();
        let name = name.to_string();

        async move {
            let (op, epoch) = {
                let mut state = store.inner.state.lock();
                let epoch = state.epoch;

                if let Some(record) = state.resident.get_mut(&name) {
                    record.refcount += 1;
                    tracing::trace!(
                        bundle = %name,
                        refcount = record.refcount,
                        "bundle already resident"
                    );
                    return Ok(LoadedBundle {
                        payload: Arc::clone(&record.payload),
                        name,
                        epoch,
                    });
                }

                let op = if let Some(in_flight) = state.in_flight.get_mut(&name) {
                    in_flight.waiters += 1;
                    tracing::debug!(
                        bundle = %name,
                        waiters = in_flight.waiters,
                        "joining in-flight bundle load"
                    );
                    in_flight.op.clone()
                } else {
                    let op = store.spawn_load(name.clone(), epoch);
                    state.in_flight.insert(
                        name.clone(),
                        InFlight {
                            op: op.clone(),
                            waiters: 1,
                        },
                    );
                    op
                };
                (op, epoch)
            };

            // A load that succeeds committed in the epoch it was joined in.
            let payload = op.await?;
            Ok(LoadedBundle {
                name,
                payload,
                epoch,
            })
        }
        .boxed()
    }

    /// Start the physical load of `name` on its own task so it completes
    /// even if every waiter goes away.
    fn spawn_load(&self, name: String, epoch: u64) -> SharedLoad {
        let task = tokio::spawn(self.clone().load_uncached(name.clone(), epoch));
        let store = self.clone();

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    tracing::error!(bundle = %name, error = %join_error, "load task aborted");
                    store.abandon(&name, epoch);
                    Err(LoadError::Unknown {
                        bundle: name,
                        message: format!("bundle load task failed: {join_error}"),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }

    async fn load_uncached(self, name: String, epoch: u64) -> LoadResult<Arc<dyn Bundle>> {
        tracing::debug!(bundle = %name, "loading bundle");

        match self.load_dependencies(&name).await {
            Ok(dependencies) => {
                let fetched = self.fetch(&name).await;
                let committed = self.commit(&name, epoch, fetched);
                if committed.is_err() {
                    self.release_retained(&dependencies);
                }
                committed
            }
            Err(err) => self.commit(&name, epoch, Err(err)),
        }
    }

    /// Retain every direct dependency of `name`. On failure nothing stays
    /// retained.
    async fn load_dependencies(&self, name: &str) -> LoadResult<Vec<LoadedBundle>> {
        let dependencies = self.inner.manifest.dependencies(name).to_vec();
        if dependencies.is_empty() {
            return Ok(Vec::new());
        }

        tracing::trace!(bundle = name, ?dependencies, "loading dependencies");
        let results = join_all(dependencies.iter().map(|dep| self.load_bundle(dep))).await;

        let mut retained = Vec::with_capacity(results.len());
        let mut failure = None;
        for (dependency, result) in dependencies.into_iter().zip(results) {
            match result {
                Ok(loaded) => retained.push(loaded),
                Err(source) if failure.is_none() => failure = Some((dependency, source)),
                Err(_) => {}
            }
        }

        match failure {
            None => Ok(retained),
            Some((dependency, source)) => {
                self.release_retained(&retained);
                Err(LoadError::DependencyFailure {
                    bundle: name.to_string(),
                    dependency,
                    source: Box::new(source),
                })
            }
        }
    }

    fn release_retained(&self, retained: &[LoadedBundle]) {
        for loaded in retained {
            self.release_in_epoch(loaded.name(), loaded.epoch());
        }
    }

    async fn fetch(&self, name: &str) -> LoadResult<Arc<dyn Bundle>> {
        let _permit = self.inner.scheduler.acquire(name).await?;
        self.inner.loader.load(name).await
    }

    /// Publish the outcome of a load. Registry updates happen here, in one
    /// critical section, after all asynchronous work is done.
    fn commit(
        &self,
        name: &str,
        epoch: u64,
        result: LoadResult<Arc<dyn Bundle>>,
    ) -> LoadResult<Arc<dyn Bundle>> {
        let mut state = self.inner.state.lock();

        if state.epoch != epoch {
            drop(state);
            tracing::warn!(bundle = name, "bundle load finished after teardown, discarding");
            if let Ok(payload) = result {
                self.inner.loader.unload(name, payload);
            }
            return Err(LoadError::TornDown {
                bundle: name.to_string(),
            });
        }

        let waiters = state
            .in_flight
            .remove(name)
            .map(|in_flight| in_flight.waiters)
            .unwrap_or(1);

        match result {
            Ok(payload) => {
                state
                    .resident
                    .insert(name.to_string(), BundleRecord::new(Arc::clone(&payload), waiters));
                drop(state);

                tracing::info!(bundle = name, refcount = waiters, "bundle loaded");
                self.emit(CacheEvent::BundleLoaded {
                    bundle: name.to_string(),
                });
                Ok(payload)
            }
            Err(err) => {
                drop(state);

                tracing::warn!(bundle = name, error = %err, "bundle load failed");
                self.emit(CacheEvent::LoadFailed {
                    bundle: name.to_string(),
                    asset: None,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn abandon(&self, name: &str, epoch: u64) {
        let mut state = self.inner.state.lock();
        if state.epoch == epoch {
            state.in_flight.remove(name);
        }
    }

    /// Return one reference to `name`.
    ///
    /// When the count reaches zero the bundle is unloaded, removed, and each
    /// of its direct dependencies is released. Releasing a bundle that is
    /// not resident does nothing.
    pub fn release(&self, name: &str) {
        self.release_if(name, None);
    }

    /// Return a reference taken in `epoch`. Ignored if the store was torn
    /// down since, as that reference is already gone.
    pub(crate) fn release_in_epoch(&self, name: &str, epoch: u64) {
        self.release_if(name, Some(epoch));
    }

    fn release_if(&self, name: &str, expected: Option<u64>) {
        let (payload, epoch) = {
            let mut state = self.inner.state.lock();
            let epoch = state.epoch;
            if expected.is_some_and(|expected| expected != epoch) {
                tracing::debug!(bundle = name, "release from before teardown ignored");
                return;
            }

            let Some(record) = state.resident.get_mut(name) else {
                tracing::trace!(bundle = name, "release of non-resident bundle ignored");
                return;
            };

            record.refcount -= 1;
            if record.refcount > 0 {
                tracing::trace!(bundle = name, refcount = record.refcount, "bundle released");
                return;
            }

            (state.resident.remove(name).map(|record| record.payload), epoch)
        };

        if let Some(payload) = payload {
            self.inner.loader.unload(name, payload);
            tracing::info!(bundle = name, "bundle unloaded");
            self.emit(CacheEvent::BundleUnloaded {
                bundle: name.to_string(),
            });

            for dep in self.inner.manifest.dependencies(name) {
                self.release_in_epoch(dep, epoch);
            }
        }
    }

    /// Unload every resident bundle and forget all in-flight loads.
    ///
    /// Intended for full teardown. Loads still running finish with
    /// [`LoadError::TornDown`] and their payloads are unloaded.
    pub fn unload_all(&self) {
        let (resident, abandoned) = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            let abandoned = state.in_flight.len();
            state.in_flight.clear();
            (std::mem::take(&mut state.resident), abandoned)
        };

        let unloaded = resident.len();
        for (name, record) in resident {
            self.inner.loader.unload(&name, record.payload);
            self.emit(CacheEvent::BundleUnloaded { bundle: name });
        }

        tracing::info!(unloaded, abandoned, "all bundles unloaded");
    }

    /// Check if `name` is resident.
    pub fn is_resident(&self, name: &str) -> bool {
        self.inner.state.lock().resident.contains_key(name)
    }

    /// Reference count of a resident bundle.
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.inner.state.lock().resident.get(name).map(|r| r.refcount)
    }

    /// Load state of `name`.
    pub fn state(&self, name: &str) -> LoadState {
        let state = self.inner.state.lock();
        if state.resident.contains_key(name) {
            LoadState::Loaded
        } else if state.in_flight.contains_key(name) {
            LoadState::Loading
        } else {
            LoadState::NotLoaded
        }
    }

    /// Number of resident bundles.
    pub fn resident_count(&self) -> usize {
        self.inner.state.lock().resident.len()
    }

    /// Number of bundle loads in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Resident bundles and the names of in-flight loads, sorted by name.
    pub fn snapshot(&self) -> (Vec<BundleSnapshot>, Vec<String>) {
        let state = self.inner.state.lock();

        let mut bundles: Vec<BundleSnapshot> = state
            .resident
            .iter()
            .map(|(name, record)| BundleSnapshot {
                name: name.clone(),
                refcount: record.refcount,
            })
            .collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));

        let mut loading: Vec<String> = state.in_flight.keys().cloned().collect();
        loading.sort_unstable();

        (bundles, loading)
    }

    /// The dependency manifest.
    pub fn manifest(&self) -> &DependencyManifest {
        &self.inner.manifest
    }

    /// The scheduler gating physical loads.
    pub fn scheduler(&self) -> &LoadScheduler {
        &self.inner.scheduler
    }

    pub(crate) fn events(&self) -> EventSink {
        Arc::clone(&self.inner.events)
    }

    fn emit(&self, event: CacheEvent) {
        self.inner.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::MemoryBundle;
    use crate::io::MemoryBundleLoader;

    fn store(manifest: Vec<(&str, Vec<&str>)>, bundles: &[&str]) -> BundleStore {
        let manifest = DependencyManifest::from_entries(manifest).unwrap();
        let mut loader = MemoryBundleLoader::new();
        for name in bundles {
            loader.insert(*name, MemoryBundle::new());
        }
        BundleStore::new(Arc::new(manifest), Arc::new(loader), LoadScheduler::new(4))
    }

    #[tokio::test]
    async fn test_resident_bundle_is_retained_again() {
        let store = store(vec![], &["a"]);

        store.load_bundle("a").await.unwrap();
        store.load_bundle("a").await.unwrap();
        assert_eq!(store.ref_count("a"), Some(2));

        store.release("a");
        assert_eq!(store.ref_count("a"), Some(1));
        store.release("a");
        assert_eq!(store.ref_count("a"), None);
        assert_eq!(store.state("a"), LoadState::NotLoaded);
    }

    #[tokio::test]
    async fn test_release_of_unknown_bundle_is_noop() {
        let store = store(vec![], &["a"]);
        store.release("never-loaded");
        assert_eq!(store.resident_count(), 0);
    }

    #[tokio::test]
    async fn test_dependencies_resident_before_dependent() {
        let store = store(vec![("a", vec!["b"]), ("b", vec!["c"])], &["a", "b", "c"]);

        store.load_bundle("a").await.unwrap();
        assert_eq!(store.ref_count("a"), Some(1));
        assert_eq!(store.ref_count("b"), Some(1));
        assert_eq!(store.ref_count("c"), Some(1));

        store.release("a");
        assert_eq!(store.resident_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_and_releases_siblings() {
        let store = store(vec![("a", vec!["b", "missing"])], &["a", "b"]);

        let err = store.load_bundle("a").await.unwrap_err();
        match &err {
            LoadError::DependencyFailure { bundle, dependency, source } => {
                assert_eq!(bundle, "a");
                assert_eq!(dependency, "missing");
                assert!(matches!(**source, LoadError::NotFound { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(store.resident_count(), 0);
        assert_eq!(store.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_unload_all_clears_everything() {
        let store = store(vec![("a", vec!["b"])], &["a", "b"]);
        store.load_bundle("a").await.unwrap();
        assert_eq!(store.resident_count(), 2);

        store.unload_all();
        assert_eq!(store.resident_count(), 0);
        assert_eq!(store.in_flight_count(), 0);

        // A fresh load after teardown starts from scratch.
        store.load_bundle("a").await.unwrap();
        assert_eq!(store.ref_count("b"), Some(1));
    }

    #[tokio::test]
    async fn test_release_from_before_teardown_is_ignored() {
        let store = store(vec![("a", vec!["b"])], &["a", "b"]);
        let stale = store.load_bundle("b").await.unwrap();

        store.unload_all();
        let fresh = store.load_bundle("a").await.unwrap();
        assert_ne!(stale.epoch(), fresh.epoch());

        store.release_in_epoch("b", stale.epoch());
        assert_eq!(store.ref_count("b"), Some(1));

        store.release_in_epoch("a", fresh.epoch());
        assert_eq!(store.resident_count(), 0);
    }
}
