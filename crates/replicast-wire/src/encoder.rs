use std::collections::BTreeMap;

use bytes::Bytes;
use replicast_types::VersionId;
use tracing::debug;

use crate::codec::FragmentCodec;
use crate::error::{WireError, WireResult};
use crate::fragment::{Fragment, Section};
use crate::metadata::encode_metadata;

/// Fragment data size that keeps a datagram inside a typical Ethernet MTU.
pub const DEFAULT_FRAGMENT_SIZE: usize = 1200;

/// Publisher-side splitter: turns one object version into datagrams.
#[derive(Clone, Debug)]
pub struct FragmentEncoder {
    fragment_size: usize,
}

impl FragmentEncoder {
    pub fn new(fragment_size: usize) -> Self {
        Self {
            fragment_size: fragment_size.max(1),
        }
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Split both sections of an object into fragments.
    ///
    /// Metadata fragments come first. An empty payload still produces one
    /// zero-length payload fragment so receivers learn its size.
    pub fn fragments(
        &self,
        key: &str,
        version: VersionId,
        properties: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> WireResult<Vec<Fragment>> {
        let metadata = Bytes::from(encode_metadata(properties)?);
        let payload = Bytes::copy_from_slice(payload);

        let mut out = self.split(key, version, Section::Metadata, &metadata)?;
        out.extend(self.split(key, version, Section::Payload, &payload)?);
        debug!(key, %version, fragments = out.len(), "object fragmented");
        Ok(out)
    }

    /// Split and encode an object straight into datagrams.
    pub fn datagrams(
        &self,
        key: &str,
        version: VersionId,
        properties: &BTreeMap<String, String>,
        payload: &[u8],
    ) -> WireResult<Vec<Vec<u8>>> {
        self.fragments(key, version, properties, payload)?
            .iter()
            .map(FragmentCodec::encode)
            .collect()
    }

    fn split(
        &self,
        key: &str,
        version: VersionId,
        section: Section,
        data: &Bytes,
    ) -> WireResult<Vec<Fragment>> {
        let section_len =
            u32::try_from(data.len()).map_err(|_| WireError::SectionTooLarge(data.len()))?;

        if data.is_empty() {
            return Ok(vec![Fragment {
                key: key.to_string(),
                version,
                section,
                section_len: 0,
                offset: 0,
                data: Bytes::new(),
            }]);
        }

        let mut fragments = Vec::with_capacity(data.len().div_ceil(self.fragment_size));
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + self.fragment_size).min(data.len());
            fragments.push(Fragment {
                key: key.to_string(),
                version,
                section,
                section_len,
                offset: offset as u32,
                data: data.slice(offset..end),
            });
            offset = end;
        }
        Ok(fragments)
    }
}

impl Default for FragmentEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_FRAGMENT_SIZE)
    }
}
