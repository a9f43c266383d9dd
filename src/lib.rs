//! Incremental-rebuild invalidation engine for a bundler's watch mode.
//!
//! The builder reports what its pipeline touches through a
//! [`PipelineHandle`]; a [`WatchCoordinator`] watches those files, evicts
//! stale cache entries the moment one changes, and delivers a single
//! debounced update per burst of edits to an [`UpdateSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use dashmap::DashMap;
//! use bundlewatch::{ChannelSink, Settings, WatchCoordinator, WatchEvent, pipeline};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load()?;
//! let cache: Arc<DashMap<String, Vec<u8>>> = Arc::new(DashMap::new());
//! let (sink, mut events) = ChannelSink::new();
//! let (handle, source) = pipeline::channel();
//!
//! let session = WatchCoordinator::builder()
//!     .config(&settings.watch)
//!     .build_cache(cache.clone())
//!     .sink(sink)
//!     .build()?
//!     .spawn(source);
//!
//! handle.module("/src/main.js", "/src/main.js");
//!
//! while let Some(event) = events.recv().await {
//!     if let WatchEvent::Update(changed) = event {
//!         println!("rebuild: {changed:?}");
//!         break;
//!     }
//! }
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod logging;
pub mod pipeline;
pub mod watcher;

pub use cache::ArtifactCache;
pub use config::{LoggingConfig, Settings, WatchConfig};
pub use pipeline::{DiscoverySource, PipelineEvent, PipelineHandle, TransformTap};
pub use watcher::{
    BundleStats, ChannelSink, Identity, UpdateSink, WatchCoordinator, WatchError, WatchEvent,
    WatchSession,
};
