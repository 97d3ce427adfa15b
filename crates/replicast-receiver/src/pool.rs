use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::processor::FragmentProcessor;

/// Sending half of the bounded datagram queue.
#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::Sender<Bytes>,
}

impl WorkerPool {
    /// Starts `workers` tasks draining a queue of `depth` datagrams.
    pub fn spawn(
        processor: Arc<FragmentProcessor>,
        workers: usize,
        depth: usize,
        cancel: CancellationToken,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<Bytes>(depth);
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let processor = processor.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker(id, rx, processor, cancel).await })
            })
            .collect();
        (Self { tx }, handles)
    }

    /// Waits for queue space. Returns `false` once the workers are gone.
    pub async fn submit(&self, datagram: Bytes) -> bool {
        self.tx.send(datagram).await.is_ok()
    }
}

async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    processor: Arc<FragmentProcessor>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = async { rx.lock().await.recv().await } => next,
        };
        match next {
            Some(datagram) => {
                processor.process_datagram(&datagram);
            }
            None => break,
        }
    }
    debug!(worker = id, "worker stopped");
}
