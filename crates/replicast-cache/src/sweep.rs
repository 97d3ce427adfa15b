use std::fmt;
use std::time::Duration;

use replicast_types::Millis;
use tracing::info;

use crate::blob::BlobStatus;
use crate::cache::ReplicaCache;

/// Thresholds applied by [`ReplicaCache::sweep_at`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepPolicy {
    /// How long an older complete version survives once a newer complete
    /// version of the same key exists, measured from its start time.
    pub supersede_after: Duration,
    /// Incomplete blobs untouched for longer than this are dropped.
    pub stale_after: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            supersede_after: Duration::from_secs(60),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// Removal counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub stale: usize,
    pub invalid: usize,
    pub superseded: usize,
    pub keys_dropped: usize,
    /// Invalid-version marks that outlived the stale window.
    pub marks_forgotten: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.expired + self.stale + self.invalid + self.superseded
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "expired={} stale={} invalid={} superseded={} keys_dropped={} marks_forgotten={}",
            self.expired,
            self.stale,
            self.invalid,
            self.superseded,
            self.keys_dropped,
            self.marks_forgotten
        )
    }
}

impl ReplicaCache {
    /// Prunes the cache as of `now`.
    ///
    /// Per key: drops checksum-invalid blobs, complete blobs whose validity
    /// ended, and incomplete blobs not touched within the stale window. Then
    /// drops older complete versions whose start time is beyond the
    /// supersession window, never touching the newest complete version.
    /// Keys left without versions are removed. Swept checksum-invalid
    /// versions stay marked invalid for the stale window.
    pub fn sweep_at(&self, now: Millis, policy: &SweepPolicy) -> SweepReport {
        let stale_ms = policy.stale_after.as_millis() as Millis;
        let supersede_ms = policy.supersede_after.as_millis() as Millis;
        let keys_before = self.len();
        let mut report = SweepReport::default();

        self.retain_lists(|key, list| {
            list.retain(|blob| {
                let reason = match blob.status() {
                    BlobStatus::ChecksumInvalid => {
                        self.mark_invalid(blob.version(), now);
                        report.invalid += 1;
                        "checksum-invalid"
                    }
                    BlobStatus::Complete if blob.validity().expired_at(now) => {
                        report.expired += 1;
                        "expired"
                    }
                    BlobStatus::Empty | BlobStatus::PartiallyReceived
                        if now.saturating_sub(blob.last_touched()) > stale_ms =>
                    {
                        report.stale += 1;
                        "stale"
                    }
                    _ => return true,
                };
                info!(key, version = %blob.version(), reason, "blob swept");
                false
            });

            let Some(newest) = list.iter().rposition(|b| b.is_complete()) else {
                return;
            };
            let mut index = 0;
            let mut newest = newest;
            while index < newest && list.len() > 1 {
                let blob = &list[index];
                if blob.is_complete() && now.saturating_sub(blob.start_time()) > supersede_ms {
                    info!(key, version = %blob.version(), "superseded version swept");
                    list.remove(index);
                    newest -= 1;
                    report.superseded += 1;
                } else {
                    index += 1;
                }
            }
        });

        report.keys_dropped = keys_before.saturating_sub(self.len());
        report.marks_forgotten = self.forget_invalid_before(now.saturating_sub(stale_ms));
        report
    }
}
