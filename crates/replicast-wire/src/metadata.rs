use std::collections::BTreeMap;

use crate::error::{WireError, WireResult};

/// Encode an object's property map into the metadata section bytes.
pub fn encode_metadata(properties: &BTreeMap<String, String>) -> WireResult<Vec<u8>> {
    bincode::serialize(properties).map_err(|e| WireError::Metadata(e.to_string()))
}

/// Decode a fully assembled metadata section.
pub fn decode_metadata(section: &[u8]) -> WireResult<BTreeMap<String, String>> {
    bincode::deserialize(section).map_err(|e| WireError::Metadata(e.to_string()))
}
