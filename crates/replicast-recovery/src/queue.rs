use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use replicast_cache::Blob;
use replicast_types::{now_ms, Millis, VersionId};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Result of polling the queue at a given instant.
#[derive(Debug)]
pub enum Poll {
    /// A ticket is due; it has been taken out of the queue.
    Ready(Arc<Blob>),
    /// Nothing due before this time.
    Wait(Millis),
    Empty,
}

struct Ticket {
    seq: u64,
    blob: Arc<Blob>,
}

#[derive(Default)]
struct State {
    /// (due, seq, version). Entries whose seq no longer matches `pending`
    /// are stale and skipped.
    heap: BinaryHeap<Reverse<(Millis, u64, VersionId)>>,
    pending: HashMap<VersionId, Ticket>,
    next_seq: u64,
}

/// Delay queue of blobs awaiting recovery.
///
/// A ticket becomes due `grace` after its blob was last touched. The due
/// time is re-read from the blob when the ticket surfaces, so a blob that
/// keeps receiving fragments is pushed back instead of fetched early. Each
/// version id is queued at most once.
pub struct RecoveryQueue {
    grace: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl RecoveryQueue {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    fn due_of(&self, blob: &Blob) -> Millis {
        blob.last_touched().saturating_add(self.grace.as_millis() as Millis)
    }

    /// Queues a blob unless its version is already queued.
    pub fn enqueue(&self, blob: Arc<Blob>) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        let version = blob.version();
        if state.pending.contains_key(&version) {
            return false;
        }
        let due = self.due_of(&blob);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Reverse((due, seq, version)));
        state.pending.insert(version, Ticket { seq, blob });
        drop(state);
        trace!(%version, due, "recovery ticket queued");
        self.notify.notify_one();
        true
    }

    /// Drops a version's ticket, e.g. once its blob completed.
    pub fn remove(&self, version: VersionId) -> bool {
        let removed = self
            .state
            .lock()
            .expect("lock poisoned")
            .pending
            .remove(&version)
            .is_some();
        if removed {
            trace!(%version, "recovery ticket dropped");
        }
        removed
    }

    pub fn contains(&self, version: VersionId) -> bool {
        self.state.lock().expect("lock poisoned").pending.contains_key(&version)
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("lock poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the earliest ticket if it is due at `now`.
    pub fn poll_at(&self, now: Millis) -> Poll {
        let mut state = self.state.lock().expect("lock poisoned");
        loop {
            let Some(Reverse((due, seq, version))) = state.heap.peek().copied() else {
                return Poll::Empty;
            };
            let current = match state.pending.get(&version) {
                Some(ticket) if ticket.seq == seq => self.due_of(&ticket.blob),
                _ => {
                    state.heap.pop();
                    continue;
                }
            };
            if current > due {
                // touched since queued
                state.heap.pop();
                state.heap.push(Reverse((current, seq, version)));
                continue;
            }
            if due > now {
                return Poll::Wait(due);
            }
            state.heap.pop();
            if let Some(ticket) = state.pending.remove(&version) {
                return Poll::Ready(ticket.blob);
            }
        }
    }

    /// Waits for the next due ticket. Returns `None` once `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Arc<Blob>> {
        loop {
            let wait = match self.poll_at(now_ms()) {
                Poll::Ready(blob) => return Some(blob),
                Poll::Wait(due) => Some(Duration::from_millis(due.saturating_sub(now_ms()))),
                Poll::Empty => None,
            };
            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }
}
