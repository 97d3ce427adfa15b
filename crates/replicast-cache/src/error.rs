use replicast_types::VersionId;
use thiserror::Error;

/// Errors from blob reassembly and cache operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A fragment addressed to another object was merged into this blob.
    #[error("fragment for {key}/{version} merged into the wrong blob")]
    WrongTarget { key: String, version: VersionId },

    /// A fragment declared a section length different from the established one.
    #[error("{section} length mismatch for {version}: established {established}, fragment declares {declared}")]
    LengthMismatch {
        version: VersionId,
        section: &'static str,
        established: u64,
        declared: u64,
    },

    /// A recovered byte range does not fit in the payload buffer.
    #[error("range [{offset}, {end}) outside payload of {size} bytes for {version}")]
    RangeOutOfBounds {
        version: VersionId,
        offset: u64,
        end: u64,
        size: u64,
    },

    /// The payload size is not known yet, so a partial range cannot be placed.
    #[error("payload size of {0} is unknown")]
    SizeUnknown(VersionId),

    /// The assembled payload does not match its declared checksum.
    #[error("checksum mismatch for {0}")]
    ChecksumInvalid(VersionId),

    /// The version failed its checksum earlier and may not be recreated.
    #[error("version {0} was discarded as invalid")]
    VersionInvalid(VersionId),
}

pub type CacheResult<T> = Result<T, CacheError>;
