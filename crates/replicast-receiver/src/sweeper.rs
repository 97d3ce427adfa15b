use std::sync::Arc;
use std::time::Duration;

use replicast_cache::{ReplicaCache, SweepPolicy};
use replicast_types::now_ms;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sweeps the cache every `interval` until cancelled.
pub async fn run_sweeper(
    cache: Arc<ReplicaCache>,
    policy: SweepPolicy,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(interval_ms = interval.as_millis() as u64, "expiration sweeper started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = cache.sweep_at(now_ms(), &policy);
                if report.removed() > 0 {
                    info!(%report, "sweep removed blobs");
                } else {
                    debug!("sweep found nothing to remove");
                }
            }
        }
    }
    info!("expiration sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use replicast_types::VersionId;

    #[tokio::test]
    async fn sweeps_stale_blob() {
        let cache = Arc::new(ReplicaCache::new());
        cache.get_or_create("k", VersionId::new(), 0).unwrap();
        let policy = SweepPolicy {
            supersede_after: Duration::from_secs(60),
            stale_after: Duration::from_millis(1),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(cache.clone(), policy, Duration::from_millis(5), cancel.clone()));
        for _ in 0..100 {
            if cache.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        task.await.unwrap();
        assert!(cache.is_empty());
    }
}
