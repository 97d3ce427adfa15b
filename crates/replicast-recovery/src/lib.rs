//! Gap recovery for replicast.
//!
//! Incomplete blobs that have not been touched for a grace period are pulled
//! from an authoritative HTTP upstream: the whole object when nothing about
//! its size is known, only headers when just metadata is missing, or the
//! missing byte ranges otherwise.
//!
//! # Key Types
//!
//! - [`RecoveryQueue`]: delay queue of tickets, deduplicated by version id
//! - [`Upstream`]: transport seam, implemented over HTTP by [`HttpUpstream`]
//! - [`RecoveryScheduler`]: drains the queue and feeds responses into blobs

pub mod config;
pub mod error;
pub mod headers;
pub mod multipart;
pub mod queue;
pub mod scheduler;
pub mod upstream;

pub use config::RecoveryConfig;
pub use error::{RecoveryError, RecoveryResult};
pub use queue::{Poll, RecoveryQueue};
pub use scheduler::{RecoveryOutcome, RecoveryScheduler};
pub use upstream::{FetchRequest, FetchResponse, HttpUpstream, Upstream};
