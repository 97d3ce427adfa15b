use std::fmt;
use std::sync::Arc;

use replicast_cache::{Blob, BlobStatus, Completeness, ReplicaCache};
use replicast_types::now_ms;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RecoveryError, RecoveryResult};
use crate::headers::recovered_properties;
use crate::multipart::{boundary, parse_byteranges, ContentRange};
use crate::queue::RecoveryQueue;
use crate::upstream::{FetchRequest, FetchResponse, Upstream};

const OK: u16 = 200;
const PARTIAL_CONTENT: u16 = 206;

/// What one recovery attempt achieved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Completed by fragments before the fetch.
    AlreadyComplete,
    Completed,
    /// Progress may have been made but bytes are still missing.
    StillIncomplete,
    /// Checksum failed; the blob was dropped from the cache.
    Invalid,
    /// Transport or protocol failure; nothing applied.
    Failed,
}

impl fmt::Display for RecoveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryOutcome::AlreadyComplete => "already-complete",
            RecoveryOutcome::Completed => "completed",
            RecoveryOutcome::StillIncomplete => "still-incomplete",
            RecoveryOutcome::Invalid => "invalid",
            RecoveryOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Drains the [`RecoveryQueue`] and repairs blobs from the upstream.
pub struct RecoveryScheduler {
    cache: Arc<ReplicaCache>,
    queue: Arc<RecoveryQueue>,
    upstream: Arc<dyn Upstream>,
}

impl RecoveryScheduler {
    pub fn new(cache: Arc<ReplicaCache>, queue: Arc<RecoveryQueue>, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            cache,
            queue,
            upstream,
        }
    }

    pub fn queue(&self) -> &Arc<RecoveryQueue> {
        &self.queue
    }

    /// Runs until `cancel` fires. Each due ticket gets one attempt; failures
    /// are logged and never retried here.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(grace_ms = self.queue.grace().as_millis() as u64, "recovery scheduler started");
        while let Some(blob) = self.queue.next(&cancel).await {
            let outcome = self.recover(&blob).await;
            debug!(key = blob.key(), version = %blob.version(), %outcome, "recovery attempt finished");
        }
        info!("recovery scheduler stopped");
    }

    /// One recovery attempt for `blob`.
    pub async fn recover(&self, blob: &Arc<Blob>) -> RecoveryOutcome {
        match blob.status() {
            BlobStatus::Complete => {
                self.queue.remove(blob.version());
                return RecoveryOutcome::AlreadyComplete;
            }
            BlobStatus::ChecksumInvalid => {
                self.discard(blob);
                return RecoveryOutcome::Invalid;
            }
            _ => {}
        }

        let request = match blob.missing_payload_ranges() {
            None => FetchRequest::Full,
            Some(ranges) if ranges.is_empty() => FetchRequest::Head,
            Some(ranges) => FetchRequest::Ranges(ranges),
        };
        debug!(key = blob.key(), version = %blob.version(), %request, "recovering blob");

        let applied = match self.upstream.fetch(blob.version(), &request).await {
            Ok(response) => apply(blob, &request, response),
            Err(e) => Err(e),
        };
        if let Err(e) = applied {
            warn!(key = blob.key(), version = %blob.version(), %request, error = %e, "recovery failed");
            return RecoveryOutcome::Failed;
        }

        match blob.recompute_completeness() {
            Completeness::Complete => {
                self.queue.remove(blob.version());
                self.cache.resort(blob.key());
                info!(key = blob.key(), version = %blob.version(), "blob recovered");
                RecoveryOutcome::Completed
            }
            Completeness::ChecksumInvalid => {
                self.discard(blob);
                RecoveryOutcome::Invalid
            }
            Completeness::Incomplete => {
                self.cache.resort(blob.key());
                RecoveryOutcome::StillIncomplete
            }
        }
    }

    fn discard(&self, blob: &Blob) {
        self.queue.remove(blob.version());
        self.cache.discard_invalid(blob.key(), blob.version(), now_ms());
    }
}

fn expect_status(response: &FetchResponse, expected: u16) -> RecoveryResult<()> {
    if response.status == expected {
        Ok(())
    } else {
        Err(RecoveryError::UnexpectedStatus {
            expected,
            actual: response.status,
        })
    }
}

/// Feeds a successful response into the blob.
fn apply(blob: &Blob, request: &FetchRequest, response: FetchResponse) -> RecoveryResult<()> {
    match request {
        FetchRequest::Full => {
            expect_status(&response, OK)?;
            blob.apply_headers(recovered_properties(&response.headers));
            blob.set_payload(response.body.to_vec());
        }
        FetchRequest::Head => {
            expect_status(&response, OK)?;
            blob.apply_headers(recovered_properties(&response.headers));
        }
        FetchRequest::Ranges(ranges) => {
            expect_status(&response, PARTIAL_CONTENT)?;
            let multipart = response.header("Content-Type").and_then(boundary);
            match multipart {
                Some(boundary) => {
                    for part in parse_byteranges(&response.body, &boundary)? {
                        blob.add_byte_range(part.offset, &part.data)?;
                    }
                }
                None => {
                    let offset = match response.header("Content-Range") {
                        Some(value) => ContentRange::parse(value)?.first,
                        None => ranges.first().map_or(0, |r| r.start),
                    };
                    blob.add_byte_range(offset, &response.body)?;
                }
            }
            blob.apply_headers(recovered_properties(&response.headers));
        }
    }
    Ok(())
}
