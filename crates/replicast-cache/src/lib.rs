//! Replicated blob cache for replicast.
//!
//! Receives unordered, duplicated, and incomplete fragments of versioned
//! objects, reassembles them into [`Blob`]s, and serves the most recent
//! complete version matching a set of query constraints.
//!
//! # Locking
//!
//! The [`ReplicaCache`] uses two tiers:
//!
//! 1. a structural `RwLock` over the key map (adding/removing keys),
//! 2. a per-key `Mutex` over each version list (append, remove, sort),
//!    always taken after the structural lock.
//!
//! Each [`Blob`] carries its own lock for merges and never takes a cache
//! lock. Cache code only reads a blob's lock-free summary (status, validity,
//! timestamps) while holding cache locks; property matching happens on a
//! snapshot of the list after the cache locks are released.

pub mod blob;
pub mod cache;
pub mod error;
pub mod query;
pub mod range;
pub mod sweep;

pub use blob::{Blob, BlobStatus, Completeness};
pub use cache::{CacheStats, FolderStats, ReplicaCache, MAX_INVALID_VERSIONS};
pub use error::{CacheError, CacheResult};
pub use query::{BrowseQuery, Constraints, PathPattern, Query};
pub use range::RangeSet;
pub use sweep::{SweepPolicy, SweepReport};
