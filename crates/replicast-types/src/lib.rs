//! Foundation types for replicast.
//!
//! Every other replicast crate depends on `replicast-types`.
//!
//! # Key Types
//!
//! - [`VersionId`]: 128-bit identifier unique to one creation of an object
//! - [`Validity`]: half-open `[from, until)` validity interval in milliseconds
//! - [`props`]: well-known object property names

pub mod error;
pub mod props;
pub mod time;
pub mod version;

pub use error::TypeError;
pub use time::{now_ms, Millis, Validity};
pub use version::VersionId;
