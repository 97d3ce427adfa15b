use thiserror::Error;

/// A datagram that could not be decoded into a fragment.
///
/// Every variant is a flavour of "malformed packet": the datagram is
/// dropped and never retried, since the transport is lossy anyway.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated datagram: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("datagram too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("bad magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported header version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown section kind {0}")]
    UnknownSection(u8),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("fragment [{offset}, {offset}+{length}) exceeds section length {section_len}")]
    RangeOutOfBounds {
        offset: u32,
        length: u32,
        section_len: u32,
    },

    #[error("{0} trailing bytes after fragment")]
    TrailingBytes(usize),

    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    #[error("section too large: {0} bytes")]
    SectionTooLarge(usize),

    #[error("declared section length {section_len} exceeds limit {max}")]
    SectionLimit { section_len: u32, max: u64 },

    #[error("metadata encoding error: {0}")]
    Metadata(String),
}

pub type WireResult<T> = Result<T, WireError>;
