use bytes::Bytes;
use replicast_types::VersionId;

use crate::error::{WireError, WireResult};
use crate::fragment::{Fragment, Section};
use crate::{MAX_DATAGRAM_SIZE, MAX_KEY_LEN};

pub const MAGIC: [u8; 4] = *b"RPCF";
pub const HEADER_VERSION: u8 = 1;

/// Magic + version + section + key length + version id + three u32 fields.
pub const FIXED_HEADER_SIZE: usize = 4 + 1 + 1 + 2 + 16 + 4 + 4 + 4;
/// CRC-32 trailer.
pub const TRAILER_SIZE: usize = 4;

/// Stateless encoder/decoder for fragment datagrams.
pub struct FragmentCodec;

impl FragmentCodec {
    /// Encode a fragment into a single datagram.
    pub fn encode(fragment: &Fragment) -> WireResult<Vec<u8>> {
        let key = fragment.key.as_bytes();
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(WireError::InvalidKey(format!("length {}", key.len())));
        }
        if fragment.end() > fragment.section_len as u64 {
            return Err(WireError::RangeOutOfBounds {
                offset: fragment.offset,
                length: fragment.data.len() as u32,
                section_len: fragment.section_len,
            });
        }
        let size = FIXED_HEADER_SIZE + key.len() + fragment.data.len() + TRAILER_SIZE;
        if size > MAX_DATAGRAM_SIZE {
            return Err(WireError::TooLarge {
                size,
                max: MAX_DATAGRAM_SIZE,
            });
        }

        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(&MAGIC);
        buf.push(HEADER_VERSION);
        buf.push(fragment.section.wire_tag());
        buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
        buf.extend_from_slice(fragment.version.as_bytes());
        buf.extend_from_slice(&fragment.section_len.to_be_bytes());
        buf.extend_from_slice(&fragment.offset.to_be_bytes());
        buf.extend_from_slice(&(fragment.data.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&fragment.data);
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Decode one datagram. `max_size` is the configured packet bound.
    pub fn decode(datagram: &[u8], max_size: usize) -> WireResult<Fragment> {
        Self::decode_bounded(datagram, max_size, u64::from(u32::MAX))
    }

    /// Like [`FragmentCodec::decode`], also rejecting fragments whose
    /// declared section length is above `max_section_len`.
    pub fn decode_bounded(datagram: &[u8], max_size: usize, max_section_len: u64) -> WireResult<Fragment> {
        if datagram.len() > max_size {
            return Err(WireError::TooLarge {
                size: datagram.len(),
                max: max_size,
            });
        }
        if datagram.len() < FIXED_HEADER_SIZE + TRAILER_SIZE {
            return Err(WireError::Truncated {
                needed: FIXED_HEADER_SIZE + TRAILER_SIZE,
                actual: datagram.len(),
            });
        }

        let magic = [datagram[0], datagram[1], datagram[2], datagram[3]];
        if magic != MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        if datagram[4] != HEADER_VERSION {
            return Err(WireError::UnsupportedVersion(datagram[4]));
        }
        let section =
            Section::from_wire_tag(datagram[5]).ok_or(WireError::UnknownSection(datagram[5]))?;
        let key_len = u16::from_be_bytes([datagram[6], datagram[7]]) as usize;
        if key_len == 0 || key_len > MAX_KEY_LEN {
            return Err(WireError::InvalidKey(format!("length {key_len}")));
        }
        let mut id = [0u8; 16];
        id.copy_from_slice(&datagram[8..24]);
        let version = VersionId::from_bytes(id);
        let section_len = read_u32(&datagram[24..28]);
        let offset = read_u32(&datagram[28..32]);
        let length = read_u32(&datagram[32..36]);
        if u64::from(section_len) > max_section_len {
            return Err(WireError::SectionLimit {
                section_len,
                max: max_section_len,
            });
        }

        let body_end = FIXED_HEADER_SIZE + key_len + length as usize;
        let needed = body_end + TRAILER_SIZE;
        if datagram.len() < needed {
            return Err(WireError::Truncated {
                needed,
                actual: datagram.len(),
            });
        }
        if datagram.len() > needed {
            return Err(WireError::TrailingBytes(datagram.len() - needed));
        }

        let expected = read_u32(&datagram[body_end..needed]);
        let actual = crc32fast::hash(&datagram[..body_end]);
        if expected != actual {
            return Err(WireError::CrcMismatch { expected, actual });
        }

        if offset as u64 + length as u64 > section_len as u64 {
            return Err(WireError::RangeOutOfBounds {
                offset,
                length,
                section_len,
            });
        }

        let key_bytes = &datagram[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + key_len];
        let key = std::str::from_utf8(key_bytes)
            .map_err(|e| WireError::InvalidKey(e.to_string()))?
            .to_string();

        Ok(Fragment {
            key,
            version,
            section,
            section_len,
            offset,
            data: Bytes::copy_from_slice(&datagram[FIXED_HEADER_SIZE + key_len..body_end]),
        })
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
