//! Watch-mode invalidation for incremental bundle rebuilds.
//!
//! Watches every file a bundle depends on, evicts cached artifacts as soon
//! as one of them changes, and reports one debounced `update` per burst of
//! edits.
//!
//! # Architecture
//!
//! ```text
//! PipelineHandle (builder)
//!         |  PipelineEvent
//!         v
//! WatchCoordinator ----> Canonicalizer (real paths, transient roots)
//!   |  |  |                     |
//!   |  |  +---> DependencyBinder (transform-read files -> owner)
//!   |  |                        |
//!   |  +------> WatchRegistry <-+  one handle per raw path, one OS watcher shared
//!   |                 |
//!   |            RawSignal (owner, WatchId)
//!   |                 v
//!   +---> CacheInvalidator (evict now) ---> Debouncer (report later)
//!                                                |
//!                                           UpdateSink
//! ```

mod backend;
mod binder;
mod canonical;
mod coordinator;
mod debouncer;
mod error;
mod invalidator;
mod registry;
mod sink;
mod stats;

pub use backend::{
    NotifyBackend, RawSignal, SignalKind, SignalTarget, WatchBackend, WatchHandle, WatchId,
};
pub use binder::{Binding, DependencyBinder};
pub use canonical::{Canonical, Canonicalizer, FsResolver, Identity, PathResolver, TransientRoots};
pub use coordinator::{WatchCoordinator, WatchCoordinatorBuilder, WatchSession};
pub use debouncer::{Debouncer, Recorded};
pub use error::WatchError;
pub use invalidator::{CacheInvalidator, Invalidation};
pub use registry::{Ensured, WatchRegistry};
pub use sink::{ChannelSink, UpdateSink, WatchEvent};
pub use stats::{BundleClock, BundleStats};
