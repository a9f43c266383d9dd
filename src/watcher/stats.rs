//! Byte and timing instrumentation for a bundle pass.

use tokio::time::{Duration, Instant};

/// Totals for one completed bundle pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleStats {
    pub bytes: usize,
    pub elapsed: Duration,
}

impl BundleStats {
    /// Human-readable summary, e.g. `"1024 bytes written (0.25 seconds)"`.
    pub fn summary(&self) -> String {
        format!(
            "{} bytes written ({:.2} seconds)",
            self.bytes,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Per-pass counters, replaced on every pipeline reset.
#[derive(Debug, Default)]
pub struct BundleClock {
    started: Option<Instant>,
    bytes: usize,
}

impl BundleClock {
    /// The record stage finished; output starts now.
    pub fn mark_start(&mut self, now: Instant) {
        self.started = Some(now);
    }

    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n;
    }

    /// Output ended. Elapsed time is zero if the start was never marked.
    pub fn finish(&self, now: Instant) -> BundleStats {
        BundleStats {
            bytes: self.bytes,
            elapsed: self
                .started
                .map(|started| now.saturating_duration_since(started))
                .unwrap_or_default(),
        }
    }
}
