//! Registry of open watchers keyed by owner identity.
//!
//! An owner is either a watched file itself or the module file that an
//! auxiliary file is attributed to. Each owner holds one handle per raw
//! path; an owner with no handles is removed rather than kept empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::backend::{RawSignal, SignalTarget, WatchBackend, WatchHandle, WatchId};
use super::canonical::Identity;
use super::error::WatchError;

struct OpenWatch {
    id: WatchId,
    path: PathBuf,
    handle: Box<dyn WatchHandle>,
}

/// Result of [`WatchRegistry::ensure_watch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Opened(WatchId),
    AlreadyWatching,
}

/// Owns every low-level watcher of a session.
pub struct WatchRegistry {
    entries: HashMap<Identity, Vec<OpenWatch>>,
    backend: Arc<dyn WatchBackend>,
    signals: mpsc::UnboundedSender<RawSignal>,
    next_id: u64,
}

impl WatchRegistry {
    pub fn new(backend: Arc<dyn WatchBackend>, signals: mpsc::UnboundedSender<RawSignal>) -> Self {
        Self {
            entries: HashMap::new(),
            backend,
            signals,
            next_id: 0,
        }
    }

    /// Watch `raw_path` on behalf of `owner`, unless already watched.
    ///
    /// On failure nothing is registered, so a new owner does not appear
    /// with an empty handle set.
    pub fn ensure_watch(&mut self, owner: &Identity, raw_path: &Path) -> Result<Ensured, WatchError> {
        if self.has_watch(owner, raw_path) {
            crate::debug_event!("registry", "already watching", "{} for {owner}", raw_path.display());
            return Ok(Ensured::AlreadyWatching);
        }

        let id = WatchId(self.next_id);
        self.next_id += 1;

        let target = SignalTarget::new(
            id,
            owner.clone(),
            raw_path.to_path_buf(),
            self.signals.clone(),
        );
        let handle = self.backend.watch(raw_path, target)?;

        self.entries.entry(owner.clone()).or_default().push(OpenWatch {
            id,
            path: raw_path.to_path_buf(),
            handle,
        });

        crate::debug_event!("registry", "watching", "{} for {owner}", raw_path.display());
        Ok(Ensured::Opened(id))
    }

    /// Close every handle under `owner` and forget the owner.
    ///
    /// Returns the number of handles closed; zero when nothing was there.
    pub fn teardown(&mut self, owner: &Identity) -> usize {
        let Some(watches) = self.entries.get_mut(owner) else {
            return 0;
        };

        let closed = watches.len();
        for watch in watches.drain(..) {
            watch.handle.close();
        }
        self.entries.remove(owner);
        closed
    }

    /// Tear down every owner. Returns the number of handles closed.
    pub fn teardown_all(&mut self) -> usize {
        let owners: Vec<Identity> = self.entries.keys().cloned().collect();
        owners.iter().map(|owner| self.teardown(owner)).sum()
    }

    pub fn has_watch(&self, owner: &Identity, raw_path: &Path) -> bool {
        self.entries
            .get(owner)
            .is_some_and(|watches| watches.iter().any(|w| w.path == raw_path))
    }

    /// Whether `watch` is still an open handle of `owner`.
    ///
    /// Signals from handles that fail this check were queued before a
    /// teardown and must not be attributed to the owner again.
    pub fn is_live(&self, owner: &Identity, watch: WatchId) -> bool {
        self.entries
            .get(owner)
            .is_some_and(|watches| watches.iter().any(|w| w.id == watch))
    }

    pub fn contains(&self, owner: &Identity) -> bool {
        self.entries.contains_key(owner)
    }

    /// Raw paths watched on behalf of `owner`.
    pub fn watched_paths(&self, owner: &Identity) -> Vec<&Path> {
        self.entries
            .get(owner)
            .map(|watches| watches.iter().map(|w| w.path.as_path()).collect())
            .unwrap_or_default()
    }

    /// Number of owners.
    pub fn owner_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of open handles across all owners.
    pub fn handle_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}
