//! Low-level single-path watches.
//!
//! A backend hands out one handle per watched raw path. Each handle reports into a
//! [`SignalTarget`] that tags its signals with the owning identity and a
//! unique [`WatchId`], so the registry can discard signals from handles it
//! has already closed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::canonical::Identity;
use super::error::WatchError;

/// Unique id of one low-level watcher handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// What a low-level watcher observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalKind {
    Changed,
    Error(String),
}

/// A raw signal, attributed to the owner the watcher was registered under.
#[derive(Debug, Clone)]
pub struct RawSignal {
    pub watch: WatchId,
    pub owner: Identity,
    pub path: PathBuf,
    pub kind: SignalKind,
}

/// Sending half handed to a backend for one handle.
#[derive(Debug, Clone)]
pub struct SignalTarget {
    watch: WatchId,
    owner: Identity,
    path: PathBuf,
    tx: mpsc::UnboundedSender<RawSignal>,
}

impl SignalTarget {
    pub(crate) fn new(
        watch: WatchId,
        owner: Identity,
        path: PathBuf,
        tx: mpsc::UnboundedSender<RawSignal>,
    ) -> Self {
        Self {
            watch,
            owner,
            path,
            tx,
        }
    }

    pub fn watch_id(&self) -> WatchId {
        self.watch
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Report a change. Dropped silently once the coordinator is gone.
    pub fn changed(&self) {
        self.send(SignalKind::Changed);
    }

    /// Report a watcher fault.
    pub fn error(&self, reason: impl Into<String>) {
        self.send(SignalKind::Error(reason.into()));
    }

    fn send(&self, kind: SignalKind) {
        let _ = self.tx.send(RawSignal {
            watch: self.watch,
            owner: self.owner.clone(),
            path: self.path.clone(),
            kind,
        });
    }
}

/// An open low-level watcher.
pub trait WatchHandle: Send {
    /// Stop watching. After this returns no further signals are produced
    /// by this handle (already queued ones are filtered by the registry).
    fn close(self: Box<Self>);
}

/// Factory for low-level watchers.
pub trait WatchBackend: Send + Sync {
    /// Open a non-recursive watcher on exactly `path`.
    fn watch(&self, path: &Path, target: SignalTarget) -> Result<Box<dyn WatchHandle>, WatchError>;
}

/// Backend sharing one `notify::RecommendedWatcher` across every path.
///
/// The OS watcher is created on the first `watch` call. Each raw path is
/// registered with it once; further handles on the same path only add a
/// target, and the path is unwatched when its last handle closes.
#[derive(Clone, Default)]
pub struct NotifyBackend {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    /// Held for the whole of a watch or close, so registration and
    /// unregistration of a path never interleave.
    watcher: Mutex<Option<RecommendedWatcher>>,
    targets: Arc<Mutex<TargetMap>>,
}

type TargetMap = HashMap<PathBuf, Vec<SignalTarget>>;

struct NotifyHandle {
    shared: Arc<Shared>,
    id: WatchId,
    path: PathBuf,
}

impl WatchHandle for NotifyHandle {
    fn close(self: Box<Self>) {
        self.shared.release(&self.path, self.id);
    }
}

/// Any event other than a pure access counts as a write.
fn is_change(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Targets an event on `path` is delivered to: watchers of the path
/// itself and of its parent directory.
fn targets_for(map: &TargetMap, path: &Path) -> Vec<SignalTarget> {
    let own = map.get(path).into_iter().flatten();
    let parent = path
        .parent()
        .and_then(|dir| map.get(dir))
        .into_iter()
        .flatten();
    own.chain(parent).cloned().collect()
}

fn dispatch(targets: &Mutex<TargetMap>, res: notify::Result<Event>) {
    match res {
        Ok(event) if is_change(&event.kind) => {
            let hit: Vec<SignalTarget> = {
                let map = targets.lock();
                event
                    .paths
                    .iter()
                    .flat_map(|path| targets_for(&map, path))
                    .collect()
            };
            for target in hit {
                target.changed();
            }
        }
        Ok(_) => {}
        Err(e) => {
            let reason = e.to_string();
            let hit: Vec<SignalTarget> = {
                let map = targets.lock();
                if e.paths.is_empty() {
                    // Not tied to a path (e.g. queue overflow): everyone hears it.
                    map.values().flatten().cloned().collect()
                } else {
                    e.paths
                        .iter()
                        .flat_map(|path| targets_for(&map, path))
                        .collect()
                }
            };
            for target in hit {
                target.error(reason.clone());
            }
        }
    }
}

impl Shared {
    fn register(self: &Arc<Self>, path: &Path, target: SignalTarget) -> Result<NotifyHandle, WatchError> {
        let mut watcher = self.watcher.lock();

        if watcher.is_none() {
            let targets = self.targets.clone();
            let created =
                notify::recommended_watcher(move |res: notify::Result<Event>| dispatch(&targets, res))?;
            crate::debug_event!("backend", "watcher created");
            *watcher = Some(created);
        }

        let id = target.watch_id();
        let first = !self.targets.lock().contains_key(path);

        // The event thread takes the target lock, so it must not be held
        // while notify talks to that thread.
        if first {
            if let Some(watcher) = watcher.as_mut() {
                watcher
                    .watch(path, RecursiveMode::NonRecursive)
                    .map_err(|e| WatchError::PathWatchFailed {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
            }
        }

        self.targets
            .lock()
            .entry(path.to_path_buf())
            .or_default()
            .push(target);

        Ok(NotifyHandle {
            shared: self.clone(),
            id,
            path: path.to_path_buf(),
        })
    }

    fn release(&self, path: &Path, id: WatchId) {
        let mut watcher = self.watcher.lock();

        let last = {
            let mut targets = self.targets.lock();
            let Some(list) = targets.get_mut(path) else {
                return;
            };
            list.retain(|t| t.watch_id() != id);
            let empty = list.is_empty();
            if empty {
                targets.remove(path);
            }
            empty
        };

        if !last {
            return;
        }
        if let Some(watcher) = watcher.as_mut() {
            if let Err(e) = watcher.unwatch(path) {
                crate::debug_event!("backend", "unwatch failed", "{}: {e}", path.display());
            }
        }
    }
}

impl NotifyBackend {
    /// Number of distinct raw paths registered with the OS watcher.
    pub fn path_count(&self) -> usize {
        self.shared.targets.lock().len()
    }
}

impl WatchBackend for NotifyBackend {
    fn watch(&self, path: &Path, target: SignalTarget) -> Result<Box<dyn WatchHandle>, WatchError> {
        let handle = self.shared.register(path, target)?;
        Ok(Box::new(handle))
    }
}
