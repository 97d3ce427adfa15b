use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use replicast_cache::{Completeness, ReplicaCache};
use replicast_recovery::RecoveryQueue;
use replicast_types::{now_ms, Millis};
use replicast_wire::{Fragment, FragmentCodec};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_OBJECT_SIZE;

/// Result of handling one datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Undecodable datagram, dropped.
    Malformed,
    /// Decoded but inconsistent with the blob it targets.
    Rejected,
    /// Target blob was already complete, or its version was discarded as
    /// invalid.
    Ignored,
    /// Merged; the blob still misses data.
    Pending,
    /// This fragment completed the blob.
    Completed,
    /// Completing the blob failed its checksum; the blob was dropped.
    Invalid,
}

/// Counters over every datagram handled.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub datagrams: AtomicU64,
    pub malformed: AtomicU64,
    pub rejected: AtomicU64,
    pub completed: AtomicU64,
    pub invalid: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestSnapshot {
    pub datagrams: u64,
    pub malformed: u64,
    pub rejected: u64,
    pub completed: u64,
    pub invalid: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: ProcessOutcome) {
        self.datagrams.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ProcessOutcome::Malformed => &self.malformed,
            ProcessOutcome::Rejected => &self.rejected,
            ProcessOutcome::Completed => &self.completed,
            ProcessOutcome::Invalid => &self.invalid,
            ProcessOutcome::Ignored | ProcessOutcome::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decode, merge, and completeness bookkeeping for incoming datagrams.
pub struct FragmentProcessor {
    cache: Arc<ReplicaCache>,
    recovery: Option<Arc<RecoveryQueue>>,
    max_packet_size: usize,
    max_object_size: u64,
    stats: IngestStats,
}

impl FragmentProcessor {
    pub fn new(cache: Arc<ReplicaCache>, recovery: Option<Arc<RecoveryQueue>>, max_packet_size: usize) -> Self {
        Self {
            cache,
            recovery,
            max_packet_size,
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            stats: IngestStats::default(),
        }
    }

    /// Caps the section length a fragment may declare.
    pub fn with_max_object_size(mut self, max_object_size: u64) -> Self {
        self.max_object_size = max_object_size;
        self
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    pub fn process_datagram(&self, datagram: &[u8]) -> ProcessOutcome {
        let decoded = FragmentCodec::decode_bounded(datagram, self.max_packet_size, self.max_object_size);
        let outcome = match decoded {
            Ok(fragment) => self.process_fragment(&fragment, now_ms()),
            Err(e) => {
                debug!(len = datagram.len(), error = %e, "malformed datagram dropped");
                ProcessOutcome::Malformed
            }
        };
        self.stats.record(outcome);
        outcome
    }

    /// Merges a decoded fragment into its blob, creating the blob on first sight.
    pub fn process_fragment(&self, fragment: &Fragment, now: Millis) -> ProcessOutcome {
        let (blob, created) = match self.cache.get_or_create(&fragment.key, fragment.version, now) {
            Ok(found) => found,
            Err(e) => {
                debug!(key = %fragment.key, error = %e, "fragment for discarded version");
                return ProcessOutcome::Ignored;
            }
        };
        if created {
            debug!(key = %fragment.key, version = %fragment.version, "new blob");
        }
        if blob.status().is_terminal() {
            return ProcessOutcome::Ignored;
        }

        let start_before = blob.start_time();
        if let Err(e) = blob.merge_at(fragment, now) {
            warn!(key = %fragment.key, version = %fragment.version, error = %e, "fragment rejected");
            return ProcessOutcome::Rejected;
        }

        let (completeness, transitioned) = blob.settle();
        match completeness {
            Completeness::Complete | Completeness::ChecksumInvalid if !transitioned => ProcessOutcome::Ignored,
            Completeness::Complete => {
                if let Some(queue) = &self.recovery {
                    queue.remove(blob.version());
                }
                self.cache.resort(blob.key());
                info!(key = blob.key(), version = %blob.version(), size = blob.size().unwrap_or(0), "object received");
                ProcessOutcome::Completed
            }
            Completeness::ChecksumInvalid => {
                if let Some(queue) = &self.recovery {
                    queue.remove(blob.version());
                }
                self.cache.discard_invalid(blob.key(), blob.version(), now);
                ProcessOutcome::Invalid
            }
            Completeness::Incomplete => {
                if blob.start_time() != start_before {
                    self.cache.resort(blob.key());
                }
                if let Some(queue) = &self.recovery {
                    queue.enqueue(blob);
                }
                ProcessOutcome::Pending
            }
        }
    }
}
