use std::fmt;

use bytes::Bytes;
use replicast_types::VersionId;

/// Which part of an object a fragment belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Section {
    /// Encoded property map.
    Metadata,
    /// Raw object bytes.
    Payload,
}

impl Section {
    pub fn wire_tag(&self) -> u8 {
        match self {
            Self::Metadata => 0,
            Self::Payload => 1,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Metadata),
            1 => Some(Self::Payload),
            _ => None,
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata => write!(f, "metadata"),
            Self::Payload => write!(f, "payload"),
        }
    }
}

/// One datagram's worth of an object section.
///
/// Invariant: `offset + data.len() <= section_len`.
#[derive(Clone, PartialEq, Eq)]
pub struct Fragment {
    pub key: String,
    pub version: VersionId,
    pub section: Section,
    /// Declared total length of the section this fragment belongs to.
    pub section_len: u32,
    pub offset: u32,
    pub data: Bytes,
}

impl Fragment {
    /// Exclusive end offset of this fragment within its section.
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.data.len() as u64
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("section", &self.section)
            .field("range", &(self.offset as u64..self.end()))
            .field("section_len", &self.section_len)
            .finish()
    }
}
