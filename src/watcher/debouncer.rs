//! Batch debouncing for change notifications.
//!
//! Editors often perform several writes for a single save (truncate, write,
//! rename, touch). The debouncer collects changed identities into one batch
//! and flushes it once, a fixed quiet window after the first change.
//!
//! ```text
//! Idle --record--> Pending --deadline--> Idle (batch flushed)
//! ```
//!
//! Recording while `Pending` joins the batch without moving the deadline.

use std::collections::BTreeSet;

use tokio::time::{Duration, Instant};

use super::canonical::Identity;

/// What happened to a recorded identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// First change of a batch; a flush is now due at this instant.
    Armed(Instant),
    /// Joined the batch that is already pending.
    Joined,
    /// The debouncer is shut down; nothing was recorded.
    Ignored,
}

#[derive(Debug)]
enum State {
    Idle,
    Pending { deadline: Instant },
    Shutdown,
}

/// Single shared timer plus the pending batch.
#[derive(Debug)]
pub struct Debouncer {
    state: State,
    batch: BTreeSet<Identity>,
    window: Duration,
}

impl Debouncer {
    /// Create a debouncer with the given quiet window in milliseconds.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            state: State::Idle,
            batch: BTreeSet::new(),
            window: Duration::from_millis(delay_ms),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Add `identity` to the current batch, arming the timer if idle.
    pub fn record(&mut self, identity: Identity, now: Instant) -> Recorded {
        match self.state {
            State::Shutdown => Recorded::Ignored,
            State::Pending { .. } => {
                self.batch.insert(identity);
                Recorded::Joined
            }
            State::Idle => {
                let deadline = now + self.window;
                self.batch.insert(identity);
                self.state = State::Pending { deadline };
                Recorded::Armed(deadline)
            }
        }
    }

    /// Instant at which the pending batch is due, if a timer is armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Pending { deadline } => Some(deadline),
            State::Idle | State::Shutdown => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending { .. })
    }

    /// Take the batch if its deadline has passed.
    ///
    /// Returns `None` when idle, shut down, or not yet due. The batch is
    /// cleared and the timer disarmed in the same step, so anything
    /// recorded afterwards belongs to the next batch.
    pub fn flush(&mut self, now: Instant) -> Option<Vec<Identity>> {
        match self.state {
            State::Pending { deadline } if now >= deadline => {
                self.state = State::Idle;
                Some(std::mem::take(&mut self.batch).into_iter().collect())
            }
            _ => None,
        }
    }

    /// Drop the pending batch and refuse further recording.
    pub fn shutdown(&mut self) {
        self.state = State::Shutdown;
        self.batch.clear();
    }

    /// Get the number of identities in the pending batch.
    pub fn pending_count(&self) -> usize {
        self.batch.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(path: &str) -> Identity {
        Identity::new(path)
    }

    #[test]
    fn test_first_record_arms_timer() {
        let mut debouncer = Debouncer::new(600);
        let start = Instant::now();

        assert_eq!(
            debouncer.record(id("/a.js"), start),
            Recorded::Armed(start + Duration::from_millis(600))
        );
        assert!(debouncer.is_pending());
        assert!(debouncer.flush(start).is_none());
    }

    #[test]
    fn test_records_in_window_join_without_extending() {
        let mut debouncer = Debouncer::new(600);
        let start = Instant::now();

        debouncer.record(id("/a.js"), start);
        let later = start + Duration::from_millis(400);
        assert_eq!(debouncer.record(id("/b.js"), later), Recorded::Joined);

        // Deadline still counts from the first change.
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(600)));
    }

    #[test]
    fn test_flush_delivers_union_without_duplicates() {
        let mut debouncer = Debouncer::new(600);
        let start = Instant::now();

        for path in ["/a.js", "/b.js", "/a.js", "/c.js", "/b.js"] {
            debouncer.record(id(path), start);
        }

        let batch = debouncer.flush(start + Duration::from_millis(600)).unwrap();
        assert_eq!(batch, vec![id("/a.js"), id("/b.js"), id("/c.js")]);
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[test]
    fn test_flush_fires_once_per_armed_timer() {
        let mut debouncer = Debouncer::new(600);
        let start = Instant::now();
        debouncer.record(id("/a.js"), start);

        let due = start + Duration::from_millis(700);
        assert!(debouncer.flush(due).is_some());
        assert!(debouncer.flush(due).is_none());

        // A new record re-arms exactly one new timer.
        assert_eq!(
            debouncer.record(id("/b.js"), due),
            Recorded::Armed(due + Duration::from_millis(600))
        );
        assert_eq!(debouncer.flush(due + Duration::from_millis(600)), Some(vec![id("/b.js")]));
    }

    #[test]
    fn test_shutdown_suppresses_everything() {
        let mut debouncer = Debouncer::new(600);
        let start = Instant::now();
        debouncer.record(id("/a.js"), start);

        debouncer.shutdown();

        assert!(debouncer.deadline().is_none());
        assert!(debouncer.flush(start + Duration::from_secs(5)).is_none());
        assert_eq!(debouncer.record(id("/b.js"), start), Recorded::Ignored);
        assert_eq!(debouncer.pending_count(), 0);
    }
}
