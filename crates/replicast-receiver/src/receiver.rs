use std::net::SocketAddr;
use std::sync::Arc;

use replicast_cache::ReplicaCache;
use replicast_recovery::{HttpUpstream, RecoveryQueue, RecoveryScheduler, Upstream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ReceiverConfig;
use crate::error::ReceiverResult;
use crate::ingest::{bind_multicast, bind_unicast, run_listener};
use crate::pool::WorkerPool;
use crate::processor::{FragmentProcessor, IngestSnapshot};
use crate::sweeper::run_sweeper;

/// Running receive pipeline: listeners, workers, recovery, and sweeper.
///
/// Every task observes one cancellation token; [`Receiver::shutdown`]
/// fires it and waits for all of them.
pub struct Receiver {
    cache: Arc<ReplicaCache>,
    processor: Arc<FragmentProcessor>,
    recovery: Option<Arc<RecoveryQueue>>,
    multicast_addr: Option<SocketAddr>,
    unicast_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Receiver {
    /// Starts the pipeline with recovery over HTTP when configured.
    pub async fn start(config: ReceiverConfig, cache: Arc<ReplicaCache>) -> ReceiverResult<Self> {
        let upstream = HttpUpstream::from_config(&config.recovery)?
            .map(|u| Arc::new(u) as Arc<dyn Upstream>);
        Self::start_with_upstream(config, cache, upstream).await
    }

    /// Starts the pipeline with an explicit recovery upstream.
    pub async fn start_with_upstream(
        config: ReceiverConfig,
        cache: Arc<ReplicaCache>,
        upstream: Option<Arc<dyn Upstream>>,
    ) -> ReceiverResult<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let multicast = match config.multicast_group {
            Some(group) => {
                let socket = bind_multicast(group, config.multicast_port, config.multicast_interface)?;
                info!(%group, port = config.multicast_port, "joined multicast group");
                Some(socket)
            }
            None => {
                info!("multicast listener disabled");
                None
            }
        };
        let unicast = match config.unicast_bind {
            Some(addr) => Some(bind_unicast(addr).await?),
            None => {
                info!("unicast listener disabled");
                None
            }
        };
        let multicast_addr = multicast.as_ref().and_then(|s| s.local_addr().ok());
        let unicast_addr = unicast.as_ref().and_then(|s| s.local_addr().ok());
        let any_listener = multicast.is_some() || unicast.is_some();

        let recovery = match upstream {
            Some(upstream) if any_listener => {
                let queue = Arc::new(RecoveryQueue::new(config.recovery.grace()));
                let scheduler = Arc::new(RecoveryScheduler::new(cache.clone(), queue.clone(), upstream));
                tasks.push(tokio::spawn(scheduler.run(cancel.clone())));
                Some(queue)
            }
            Some(_) => {
                warn!("recovery configured but no listener enabled; recovery not started");
                None
            }
            None => {
                info!("no recovery upstream configured");
                None
            }
        };

        let processor = Arc::new(
            FragmentProcessor::new(cache.clone(), recovery.clone(), config.max_packet_size)
                .with_max_object_size(config.max_object_size),
        );
        let (pool, workers) = WorkerPool::spawn(
            processor.clone(),
            config.worker_count(),
            config.queue_depth,
            cancel.clone(),
        );
        tasks.extend(workers);

        if let Some(socket) = multicast {
            tasks.push(tokio::spawn(run_listener(
                "multicast",
                socket,
                config.max_packet_size,
                pool.clone(),
                cancel.clone(),
            )));
        }
        if let Some(socket) = unicast {
            tasks.push(tokio::spawn(run_listener(
                "unicast",
                socket,
                config.max_packet_size,
                pool.clone(),
                cancel.clone(),
            )));
        }
        drop(pool);

        tasks.push(tokio::spawn(run_sweeper(
            cache.clone(),
            config.sweep_policy(),
            config.sweep_interval(),
            cancel.clone(),
        )));

        info!(
            workers = config.worker_count(),
            multicast = ?multicast_addr,
            unicast = ?unicast_addr,
            recovery = recovery.is_some(),
            "receiver started"
        );

        Ok(Self {
            cache,
            processor,
            recovery,
            multicast_addr,
            unicast_addr,
            cancel,
            tasks,
        })
    }

    pub fn cache(&self) -> &Arc<ReplicaCache> {
        &self.cache
    }

    pub fn recovery_queue(&self) -> Option<&Arc<RecoveryQueue>> {
        self.recovery.as_ref()
    }

    pub fn multicast_addr(&self) -> Option<SocketAddr> {
        self.multicast_addr
    }

    pub fn unicast_addr(&self) -> Option<SocketAddr> {
        self.unicast_addr
    }

    pub fn stats(&self) -> IngestSnapshot {
        self.processor.stats().snapshot()
    }

    /// Token observed by every task; cancelling it stops the pipeline.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "receiver task ended abnormally");
            }
        }
        let stats = self.processor.stats().snapshot();
        info!(
            datagrams = stats.datagrams,
            malformed = stats.malformed,
            completed = stats.completed,
            invalid = stats.invalid,
            "receiver stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use md5::{Digest, Md5};
    use replicast_cache::Query;
    use replicast_recovery::{FetchRequest, FetchResponse, RecoveryConfig, RecoveryResult};
    use replicast_types::{props, VersionId};
    use replicast_wire::FragmentEncoder;
    use tokio::net::UdpSocket;

    fn unicast_config() -> ReceiverConfig {
        ReceiverConfig {
            unicast_bind: Some("127.0.0.1:0".parse().unwrap()),
            workers: 2,
            ..Default::default()
        }
    }

    fn object(payload: &[u8]) -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        p.insert(props::VALID_FROM.to_string(), "0".to_string());
        p.insert(props::CONTENT_MD5.to_string(), hex::encode(Md5::digest(payload)));
        p
    }

    async fn wait_for(cache: &ReplicaCache, key: &str) -> bool {
        for _ in 0..200 {
            if cache.lookup_best(&Query::new(key)).is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    struct RangeServer {
        payload: Bytes,
        properties: BTreeMap<String, String>,
    }

    #[async_trait]
    impl Upstream for RangeServer {
        async fn fetch(&self, _v: VersionId, request: &FetchRequest) -> RecoveryResult<FetchResponse> {
            let FetchRequest::Ranges(ranges) = request else {
                return Ok(FetchResponse { status: 404, ..Default::default() });
            };
            let r = &ranges[0];
            let mut headers: Vec<(String, String)> =
                self.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            headers.push((
                "Content-Range".into(),
                format!("bytes {}-{}/{}", r.start, r.end - 1, self.payload.len()),
            ));
            Ok(FetchResponse {
                status: 206,
                headers,
                body: self.payload.slice(r.start as usize..r.end as usize),
            })
        }
    }

    #[tokio::test]
    async fn unicast_datagrams_reach_cache() {
        let cache = Arc::new(ReplicaCache::new());
        let receiver = Receiver::start(unicast_config(), cache.clone()).await.unwrap();
        let target = receiver.unicast_addr().unwrap();
        assert!(receiver.recovery_queue().is_none());

        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 256) as u8).collect();
        let v = VersionId::new();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for d in FragmentEncoder::default()
            .datagrams("DET/A", v, &object(&payload), &payload)
            .unwrap()
        {
            sender.send_to(&d, target).await.unwrap();
        }

        assert!(wait_for(&cache, "DET/A").await);
        let blob = cache.lookup_best(&Query::new("DET/A")).unwrap();
        assert_eq!(blob.version(), v);
        assert_eq!(blob.payload().unwrap().as_ref(), payload.as_slice());
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn lost_tail_recovered_after_grace() {
        let cache = Arc::new(ReplicaCache::new());
        let payload: Vec<u8> = (0..200u8).collect();
        let properties = object(&payload);
        let upstream: Arc<dyn Upstream> = Arc::new(RangeServer {
            payload: Bytes::from(payload.clone()),
            properties: properties.clone(),
        });
        let config = ReceiverConfig {
            recovery: RecoveryConfig {
                grace_ms: 50,
                ..Default::default()
            },
            ..unicast_config()
        };
        let receiver = Receiver::start_with_upstream(config, cache.clone(), Some(upstream))
            .await
            .unwrap();
        let target = receiver.unicast_addr().unwrap();

        let v = VersionId::new();
        let datagrams = FragmentEncoder::new(100)
            .datagrams("DET/A", v, &properties, &payload)
            .unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        // drop the last payload fragment, bytes [100, 200)
        for d in &datagrams[..datagrams.len() - 1] {
            sender.send_to(d, target).await.unwrap();
        }

        assert!(wait_for(&cache, "DET/A").await);
        let blob = cache.find("DET/A", v).unwrap();
        assert_eq!(blob.payload().unwrap().as_ref(), payload.as_slice());
        assert!(receiver.recovery_queue().unwrap().is_empty());
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn recovery_needs_a_listener() {
        let cache = Arc::new(ReplicaCache::new());
        let upstream: Arc<dyn Upstream> = Arc::new(RangeServer {
            payload: Bytes::new(),
            properties: BTreeMap::new(),
        });
        let receiver = Receiver::start_with_upstream(ReceiverConfig::default(), cache, Some(upstream))
            .await
            .unwrap();
        assert!(receiver.recovery_queue().is_none());
        receiver.shutdown().await;
    }
}
