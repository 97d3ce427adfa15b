//! HTTP read API for replicast.
//!
//! Serves complete objects out of a [`replicast_cache::ReplicaCache`]: point
//! lookups by path and time, downloads by version id with byte ranges,
//! browsing, and local uploads. The download endpoint is also what receivers
//! use as their recovery upstream.

pub mod config;
pub mod error;
pub mod handler;
pub mod range;
pub mod request;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use range::{parse_range, RangeSpec};
pub use request::ObjectRequest;
pub use router::{build_router, AppState};
pub use server::ReplicastServer;
