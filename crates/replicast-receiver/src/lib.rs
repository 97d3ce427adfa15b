//! Datagram ingestion for replicast.
//!
//! Two optional listeners (multicast group, unicast port) read raw
//! datagrams and hand them to a bounded pool of workers that decode and
//! merge them into the [`ReplicaCache`](replicast_cache::ReplicaCache).
//! Incomplete blobs are queued for HTTP recovery; a periodic sweeper prunes
//! expired, stale, and superseded versions.

pub mod config;
pub mod error;
pub mod ingest;
pub mod pool;
pub mod processor;
pub mod receiver;
pub mod sweeper;

pub use config::{ReceiverConfig, DEFAULT_MAX_OBJECT_SIZE, DEFAULT_MULTICAST_PORT};
pub use error::{ReceiverError, ReceiverResult};
pub use pool::WorkerPool;
pub use processor::{FragmentProcessor, IngestSnapshot, IngestStats, ProcessOutcome};
pub use receiver::Receiver;
