//! Watch session that ties discovery, watching, invalidation and
//! debouncing together.
//!
//! The coordinator is a single task. Filesystem lookups run on a
//! `JoinSet` and report back into the loop in whatever order they finish;
//! every completion is applied against the current registry state, never a
//! reference captured before the lookup started.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::cache::ArtifactCache;
use crate::config::WatchConfig;
use crate::pipeline::{DiscoverySource, PipelineEvent};

use super::backend::{NotifyBackend, RawSignal, SignalKind, WatchBackend};
use super::binder::{Binding, DependencyBinder};
use super::canonical::{Canonical, Canonicalizer, FsResolver, Identity, PathResolver, TransientRoots};
use super::debouncer::{Debouncer, Recorded};
use super::error::WatchError;
use super::invalidator::CacheInvalidator;
use super::registry::{Ensured, WatchRegistry};
use super::sink::UpdateSink;
use super::stats::BundleClock;

/// A finished filesystem lookup, waiting to be applied.
#[derive(Debug)]
enum Resolution {
    /// Watch the identity itself, optionally recording a module id for it.
    Watch {
        canonical: Canonical,
        module: Option<String>,
    },
    /// Watch an auxiliary file under its owner.
    Bind(Binding),
    /// The discovered path is a directory.
    Skipped { path: PathBuf },
}

/// Orchestrates one watch session.
///
/// Build with [`WatchCoordinator::builder`], then either [`spawn`] it or
/// drive it manually through the `on_*` methods.
///
/// [`spawn`]: WatchCoordinator::spawn
pub struct WatchCoordinator {
    canonicalizer: Arc<Canonicalizer>,
    binder: DependencyBinder,
    registry: WatchRegistry,
    invalidator: CacheInvalidator,
    debouncer: Debouncer,
    clock: BundleClock,
    resolving: JoinSet<Resolution>,
    signals: mpsc::UnboundedReceiver<RawSignal>,
    sink: Arc<dyn UpdateSink>,
    skip_directories: bool,
    passes: u64,
    closed: bool,
}

impl WatchCoordinator {
    /// Create a builder for configuring the coordinator.
    pub fn builder() -> WatchCoordinatorBuilder {
        WatchCoordinatorBuilder::new()
    }

    /// Run the session on its own task.
    pub fn spawn<S>(self, source: S) -> WatchSession
    where
        S: DiscoverySource + 'static,
    {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(source, shutdown.clone()));
        WatchSession {
            _close_on_drop: shutdown.clone().drop_guard(),
            shutdown,
            task,
        }
    }

    /// Main loop, in priority order:
    ///
    /// 1. Flushes the debounced batch when its deadline passes
    /// 2. Invalidates on raw change signals
    /// 3. Applies finished path lookups
    /// 4. Applies pipeline events from `source`
    ///
    /// Runs until `shutdown` is cancelled, then closes every watch. The
    /// loop keeps going after `source` ends, since edits to files that are
    /// already watched still need reporting.
    pub async fn run<S>(mut self, mut source: S, shutdown: CancellationToken)
    where
        S: DiscoverySource,
    {
        self.on_reset();
        crate::log_event!("watcher", "started", "quiet window {:?}", self.debouncer.window());

        let mut source_open = true;

        loop {
            let deadline = self.debouncer.deadline();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                // A due batch goes out before anything new is taken in.
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_due(Instant::now());
                }

                Some(signal) = self.signals.recv() => self.on_signal(signal),

                Some(joined) = self.resolving.join_next() => match joined {
                    Ok(resolution) => self.apply(resolution),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!(component = "watcher", "path lookup failed: {e}"),
                },

                event = source.next_event(), if source_open => match event {
                    Some(event) => self.on_pipeline_event(event),
                    None => {
                        crate::debug_event!("watcher", "discovery source ended");
                        source_open = false;
                    }
                },
            }
        }

        self.close();
    }

    /// Dispatch one pipeline event.
    pub fn on_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Dependency { id, file } => match (id, file) {
                (Some(id), Some(file)) => self.on_discovered_module(id, file),
                (None, Some(file)) => self.on_discovered_file(file),
                (_, None) => {}
            },
            PipelineEvent::File(path) => self.on_discovered_file(path),
            PipelineEvent::Package { dir } => self.on_discovered_package_boundary(dir),
            PipelineEvent::Reset => self.on_reset(),
            PipelineEvent::TransformRead { owner, file } => {
                self.on_transform_reads_file(owner, file)
            }
            PipelineEvent::RecordEnd => self.clock.mark_start(Instant::now()),
            PipelineEvent::Wrote(bytes) => self.clock.add_bytes(bytes),
            PipelineEvent::WrapEnd => {
                let stats = self.clock.finish(Instant::now());
                crate::log_event!("bundle", "written", "{}", stats.summary());
                self.sink.bundle(stats);
            }
        }
    }

    /// A fresh pipeline pass began; re-arm the per-pass instrumentation.
    pub fn on_reset(&mut self) {
        self.passes += 1;
        self.clock = BundleClock::default();
        crate::debug_event!("pipeline", "reset", "pass {}", self.passes);
    }

    pub fn on_discovered_file(&mut self, path: PathBuf) {
        self.discover(path, None);
    }

    /// Watch a module file and remember which cache key it was built under.
    pub fn on_discovered_module(&mut self, id: String, path: PathBuf) {
        self.discover(path, Some(id));
    }

    pub fn on_discovered_package_boundary(&mut self, dir: PathBuf) {
        self.discover(dir.join("package.json"), None);
    }

    pub fn on_transform_reads_file(&mut self, owner: PathBuf, file: PathBuf) {
        if self.closed {
            return;
        }
        let binding = self.binder.bind(owner, file);
        self.resolving
            .spawn(async move { Resolution::Bind(binding.await) });
    }

    fn discover(&mut self, path: PathBuf, module: Option<String>) {
        if self.closed {
            return;
        }
        let canonicalizer = self.canonicalizer.clone();
        let skip_directories = self.skip_directories;

        self.resolving.spawn(async move {
            if skip_directories && canonicalizer.is_dir(&path).await {
                return Resolution::Skipped { path };
            }
            let canonical = canonicalizer.canonicalize(&path).await;
            Resolution::Watch { canonical, module }
        });
    }

    fn apply(&mut self, resolution: Resolution) {
        // Lookups that finish after close must not open new watchers.
        if self.closed {
            return;
        }

        match resolution {
            Resolution::Watch { canonical, module } => {
                let identity = canonical.into_identity();
                if let Some(id) = module {
                    self.invalidator.record_module(identity.clone(), id);
                }
                let result = self.registry.ensure_watch(&identity, identity.as_path());
                self.report_install(&identity, result);
            }
            Resolution::Bind(binding) => {
                let result = binding.install(&mut self.registry);
                self.report_install(binding.owner.identity(), result);
            }
            Resolution::Skipped { path } => {
                crate::debug_event!("watcher", "skipped directory", "{}", path.display());
            }
        }
    }

    fn report_install(&self, owner: &Identity, result: Result<Ensured, WatchError>) {
        match result {
            Ok(Ensured::Opened(_)) => {
                crate::debug_event!(
                    "watcher",
                    "watching",
                    "{owner} ({} handles total)",
                    self.registry.handle_count()
                );
            }
            Ok(Ensured::AlreadyWatching) => {}
            Err(e) => {
                crate::warn_event!("watcher", "watch failed", "{e}");
                self.sink.error(e);
            }
        }
    }

    /// Handle a raw signal from a low-level watcher.
    pub fn on_signal(&mut self, signal: RawSignal) {
        if self.closed {
            return;
        }
        if !self.registry.is_live(&signal.owner, signal.watch) {
            crate::debug_event!("watcher", "stale signal", "{}", signal.path.display());
            return;
        }

        match signal.kind {
            SignalKind::Changed => self.invalidate(signal.owner),
            SignalKind::Error(details) => {
                crate::warn_event!("watcher", "watcher error", "{}: {details}", signal.path.display());
                self.sink.error(WatchError::EventError {
                    path: signal.path,
                    details,
                });
            }
        }
    }

    /// Evict caches and watches for `identity` now, report it later.
    fn invalidate(&mut self, identity: Identity) {
        let result = self.invalidator.invalidate(&identity, &mut self.registry);
        crate::log_event!(
            "watcher",
            "changed",
            "{identity} (evicted {}, closed {} watchers)",
            result.evicted.len() + usize::from(result.package_evicted),
            result.closed
        );

        match self.debouncer.record(identity, Instant::now()) {
            Recorded::Armed(deadline) => {
                crate::debug_event!("watcher", "batch armed", "due at {deadline:?}");
            }
            Recorded::Joined | Recorded::Ignored => {}
        }
    }

    /// Deliver the pending batch if its quiet window has elapsed.
    pub fn flush_due(&mut self, now: Instant) {
        let Some(batch) = self.debouncer.flush(now) else {
            return;
        };
        let changed: Vec<String> = batch.iter().map(Identity::key).collect();
        crate::log_event!("watcher", "update", "{} changed", changed.len());
        self.sink.update(changed);
    }

    /// Tear down every watch and stop reacting to anything. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.debouncer.shutdown();
        self.resolving.abort_all();
        let closed = self.registry.teardown_all();
        crate::log_event!("watcher", "closed", "{closed} watchers");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Watch registry, for inspection.
    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }
}

/// Handle to a spawned session.
///
/// Dropping the handle closes the session, same as [`WatchSession::close`].
pub struct WatchSession {
    shutdown: CancellationToken,
    _close_on_drop: DropGuard,
    task: JoinHandle<()>,
}

impl WatchSession {
    /// Ask the session to close all watches and stop. Idempotent.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for the session task to finish. Only returns once the session
    /// was closed.
    pub async fn join(self) -> Result<(), WatchError> {
        let WatchSession {
            _close_on_drop: _guard,
            task,
            ..
        } = self;
        task.await.map_err(|e| WatchError::TaskFailed {
            reason: e.to_string(),
        })
    }
}

/// Builder for constructing a WatchCoordinator.
pub struct WatchCoordinatorBuilder {
    delay_ms: u64,
    transient_roots: TransientRoots,
    skip_directories: bool,
    build_cache: Option<Arc<dyn ArtifactCache>>,
    package_cache: Option<Arc<dyn ArtifactCache>>,
    sink: Option<Arc<dyn UpdateSink>>,
    backend: Arc<dyn WatchBackend>,
    resolver: Arc<dyn PathResolver>,
}

impl WatchCoordinatorBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        let defaults = WatchConfig::default();
        Self {
            delay_ms: defaults.delay_ms,
            transient_roots: TransientRoots::new(defaults.transient_roots),
            skip_directories: defaults.skip_directories,
            build_cache: None,
            package_cache: None,
            sink: None,
            backend: Arc::new(NotifyBackend::default()),
            resolver: Arc::new(FsResolver),
        }
    }

    /// Take delay, transient roots and directory handling from config.
    pub fn config(mut self, config: &WatchConfig) -> Self {
        self.delay_ms = config.delay_ms;
        self.transient_roots = TransientRoots::new(config.transient_roots.iter().cloned());
        self.skip_directories = config.skip_directories;
        self
    }

    /// Set the quiet window in milliseconds.
    pub fn delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    pub fn transient_roots(mut self, roots: TransientRoots) -> Self {
        self.transient_roots = roots;
        self
    }

    pub fn skip_directories(mut self, skip: bool) -> Self {
        self.skip_directories = skip;
        self
    }

    /// Set the builder's module artifact cache.
    pub fn build_cache(mut self, cache: Arc<dyn ArtifactCache>) -> Self {
        self.build_cache = Some(cache);
        self
    }

    /// Set the builder's package metadata cache.
    pub fn package_cache(mut self, cache: Arc<dyn ArtifactCache>) -> Self {
        self.package_cache = Some(cache);
        self
    }

    pub fn sink(mut self, sink: impl UpdateSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    pub fn backend(mut self, backend: impl WatchBackend + 'static) -> Self {
        self.backend = Arc::new(backend);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PathResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Build the WatchCoordinator.
    pub fn build(self) -> Result<WatchCoordinator, WatchError> {
        let sink = self.sink.ok_or_else(|| WatchError::InitFailed {
            reason: "Update sink is required".to_string(),
        })?;

        if self.transient_roots.is_empty() {
            crate::debug_event!("watcher", "no transient roots, resolving every symlink");
        }

        let canonicalizer = Arc::new(Canonicalizer::new(self.resolver, self.transient_roots));
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(WatchCoordinator {
            binder: DependencyBinder::new(canonicalizer.clone()),
            canonicalizer,
            registry: WatchRegistry::new(self.backend, tx),
            invalidator: CacheInvalidator::new(self.build_cache, self.package_cache),
            debouncer: Debouncer::new(self.delay_ms),
            clock: BundleClock::default(),
            resolving: JoinSet::new(),
            signals: rx,
            sink,
            skip_directories: self.skip_directories,
            passes: 0,
            closed: false,
        })
    }
}

impl Default for WatchCoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
