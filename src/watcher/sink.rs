//! Outputs of a watch session.

use tokio::sync::mpsc;

use super::error::WatchError;
use super::stats::BundleStats;

/// Receives everything the session reports back to the builder.
pub trait UpdateSink: Send + Sync {
    /// A debounced batch of changed identities. Called at most once per
    /// quiet window, never with an empty batch.
    fn update(&self, changed: Vec<String>);

    /// A non-fatal fault (watcher error or failed watch setup).
    fn error(&self, error: WatchError);

    /// A bundle pass finished writing output.
    fn bundle(&self, _stats: BundleStats) {}
}

/// Event delivered by [`ChannelSink`].
#[derive(Debug)]
pub enum WatchEvent {
    Update(Vec<String>),
    Error(WatchError),
    Bundle(BundleStats),
}

/// Sink that forwards events over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<WatchEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: WatchEvent) {
        if self.tx.send(event).is_err() {
            crate::debug_event!("sink", "dropped", "no receiver");
        }
    }
}

impl UpdateSink for ChannelSink {
    fn update(&self, changed: Vec<String>) {
        self.send(WatchEvent::Update(changed));
    }

    fn error(&self, error: WatchError) {
        self.send(WatchEvent::Error(error));
    }

    fn bundle(&self, stats: BundleStats) {
        self.send(WatchEvent::Bundle(stats));
    }
}
