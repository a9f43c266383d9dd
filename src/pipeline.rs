//! Builder-facing discovery capability.
//!
//! The bundler reports what its pipeline touches through a
//! [`PipelineHandle`]; the watch session consumes the other end as a
//! [`DiscoverySource`]. Sending never fails from the builder's point of
//! view, even after the session has closed.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Something the builder's pipeline discovered or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A resolved module record.
    Dependency {
        id: Option<String>,
        file: Option<PathBuf>,
    },
    /// A file read outside of module resolution.
    File(PathBuf),
    /// A package boundary; `<dir>/package.json` is watched.
    Package { dir: PathBuf },
    /// A fresh pipeline pass started.
    Reset,
    /// A transform of `owner` read the auxiliary `file`.
    TransformRead { owner: PathBuf, file: PathBuf },
    /// The record stage of the current pass ended.
    RecordEnd,
    /// The output stage wrote this many bytes.
    Wrote(usize),
    /// The output stage finished.
    WrapEnd,
}

/// Narrow capability the watch session needs from a builder.
#[async_trait]
pub trait DiscoverySource: Send {
    /// Next event, or `None` when the builder will send no more.
    async fn next_event(&mut self) -> Option<PipelineEvent>;
}

/// Create a connected handle/source pair.
pub fn channel() -> (PipelineHandle, PipelineEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PipelineHandle { tx }, PipelineEvents { rx })
}

/// Builder side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineHandle {
    pub fn send(&self, event: PipelineEvent) {
        // A closed session simply stops listening.
        let _ = self.tx.send(event);
    }

    pub fn dependency(&self, id: Option<String>, file: Option<PathBuf>) {
        self.send(PipelineEvent::Dependency { id, file });
    }

    /// Shorthand for a module with both an id and a file.
    pub fn module(&self, id: impl Into<String>, file: impl Into<PathBuf>) {
        self.dependency(Some(id.into()), Some(file.into()));
    }

    pub fn file(&self, path: impl Into<PathBuf>) {
        self.send(PipelineEvent::File(path.into()));
    }

    pub fn package(&self, dir: impl Into<PathBuf>) {
        self.send(PipelineEvent::Package { dir: dir.into() });
    }

    pub fn reset(&self) {
        self.send(PipelineEvent::Reset);
    }

    /// Tap for a transform applied to `owner`.
    pub fn transform(&self, owner: impl Into<PathBuf>) -> TransformTap {
        TransformTap {
            owner: owner.into(),
            handle: self.clone(),
        }
    }

    pub fn record_end(&self) {
        self.send(PipelineEvent::RecordEnd);
    }

    pub fn wrote(&self, bytes: usize) {
        self.send(PipelineEvent::Wrote(bytes));
    }

    pub fn wrap_end(&self) {
        self.send(PipelineEvent::WrapEnd);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reports files read by one transform on behalf of its module.
#[derive(Debug, Clone)]
pub struct TransformTap {
    owner: PathBuf,
    handle: PipelineHandle,
}

impl TransformTap {
    pub fn file_read(&self, file: impl Into<PathBuf>) {
        self.handle.send(PipelineEvent::TransformRead {
            owner: self.owner.clone(),
            file: file.into(),
        });
    }
}

/// Session side of [`channel`].
#[derive(Debug)]
pub struct PipelineEvents {
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

#[async_trait]
impl DiscoverySource for PipelineEvents {
    async fn next_event(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }
}
