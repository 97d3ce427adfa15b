//! Datagram wire format for replicast.
//!
//! One datagram carries one [`Fragment`]: a byte range of either the
//! metadata section or the payload section of a versioned object. The
//! layout is private to replicast publishers and receivers and is
//! versioned by a header version byte.
//!
//! ```text
//! [4  magic "RPCF"]
//! [1  header version]
//! [1  section kind: 0 metadata, 1 payload]
//! [2  key length K]
//! [16 version id]
//! [4  section total length]
//! [4  fragment offset]
//! [4  fragment length N]
//! [K  key, UTF-8]
//! [N  fragment bytes]
//! [4  CRC-32 of all preceding bytes]
//! ```
//!
//! All integers are big-endian.

pub mod codec;
pub mod encoder;
pub mod error;
pub mod fragment;
pub mod metadata;

pub use codec::{FragmentCodec, FIXED_HEADER_SIZE, HEADER_VERSION, MAGIC, TRAILER_SIZE};
pub use encoder::{FragmentEncoder, DEFAULT_FRAGMENT_SIZE};
pub use error::{WireError, WireResult};
pub use fragment::{Fragment, Section};
pub use metadata::{decode_metadata, encode_metadata};

/// Largest payload a UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Longest key accepted on the wire.
pub const MAX_KEY_LEN: usize = 1024;
