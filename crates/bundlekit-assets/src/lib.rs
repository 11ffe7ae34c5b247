//! Bundlekit Assets
//!
//! Deduplicated, reference-counted loading of content bundles and the assets
//! inside them.
//!
//! # Features
//!
//! - **Dependency loading**: a bundle's dependencies are made resident
//!   before the bundle itself, following a [`DependencyManifest`].
//! - **Request deduplication**: concurrent requests for the same bundle or
//!   asset share one physical load.
//! - **Reference counting**: every [`AssetHandle`] is one reference; the last
//!   one to go releases the bundle, which cascades to its dependencies.
//! - **Bounded I/O**: a [`LoadScheduler`] caps concurrent physical loads.
//! - **Timeouts**: asset loads race a deadline without cancelling the load.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bundlekit_assets::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let loader = MemoryBundleLoader::new()
//!     .with_bundle("ui/login.b", MemoryBundle::new().with_asset("title", String::from("Welcome")))
//!     .with_bundle("ui/common.b", MemoryBundle::new());
//!
//! let system = AssetSystem::initialize(
//!     AssetSystemConfig::default(),
//!     ManifestSource::Json(r#"{ "ui/login.b": ["ui/common.b"] }"#.to_string()),
//!     Arc::new(loader),
//! )
//! .await?;
//!
//! let title: AssetHandle<String> = system
//!     .load_asset("ui/login.b", "title", Duration::from_secs(5))
//!     .await?;
//! assert_eq!(title.asset().map(String::as_str), Some("Welcome"));
//! assert_eq!(system.store().resident_count(), 2);
//!
//! drop(title);
//! assert_eq!(system.store().resident_count(), 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod bundle;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod handle;
pub mod io;
pub mod manifest;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod store;
pub mod system;

pub use async_trait::async_trait;

pub use bundle::{Asset, Bundle, ErasedAsset, MemoryBundle};
pub use cache::{AssetCache, AssetKey};
pub use config::AssetSystemConfig;
pub use error::{InitError, LoadError, LoadResult};
pub use event::{CacheEvent, CacheEventBuffer};
pub use handle::AssetHandle;
pub use io::{BundleDecoder, BundleLoader, FileBundleLoader, MemoryBundleLoader};
pub use manifest::{DependencyManifest, ManifestSource};
pub use scheduler::{LoadScheduler, SchedulerPermit};
pub use source::{BundlePathProvider, DefaultBundlePathProvider, OverridePathProvider};
pub use state::{AssetSnapshot, BundleSnapshot, CacheSnapshot, LoadState};
pub use store::{BundleStore, LoadedBundle};
pub use system::AssetSystem;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Asset, AssetHandle, AssetSystem, AssetSystemConfig, Bundle, BundleLoader, CacheEvent,
        DefaultBundlePathProvider, FileBundleLoader, LoadError, LoadResult, ManifestSource,
        MemoryBundle, MemoryBundleLoader,
    };
}
