use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TypeError;

/// Identifier unique to one creation of an object at a given key.
///
/// A `VersionId` is a 128-bit UUID. Publishers mint time-ordered v7 ids, but
/// any UUID received from the wire or from the authoritative endpoint is
/// accepted. Ordering is plain byte ordering and is only used to break ties
/// between versions created at the same millisecond.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionId(Uuid);

impl VersionId {
    /// Mint a fresh, time-ordered version id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a `VersionId` from its 16 raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Create a `VersionId` from a byte slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: 16,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(arr))
    }

    /// The nil version id (all zeros).
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Returns `true` if this is the nil version id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0.as_bytes()[..4])
    }
}

impl Default for VersionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for VersionId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| TypeError::InvalidVersionId(format!("{s}: {e}")))
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.short_hex())
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for VersionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<[u8; 16]> for VersionId {
    fn from(bytes: [u8; 16]) -> Self {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(VersionId::new(), VersionId::new());
    }

    #[test]
    fn parse_display_roundtrip() {
        let id = VersionId::new();
        let parsed: VersionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<VersionId>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidVersionId(_)));
    }

    #[test]
    fn from_slice_checks_length() {
        let err = VersionId::from_slice(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, TypeError::InvalidLength { expected: 16, actual: 3 });
        let id = VersionId::from_slice(&[7u8; 16]).unwrap();
        assert_eq!(id.as_bytes(), &[7u8; 16]);
    }

    #[test]
    fn nil_is_all_zeros() {
        assert!(VersionId::nil().is_nil());
        assert!(!VersionId::new().is_nil());
    }

    #[test]
    fn ordering_follows_bytes() {
        let a = VersionId::from_bytes([0; 16]);
        let b = VersionId::from_bytes([1; 16]);
        assert!(a < b);
    }

    #[test]
    fn serde_roundtrip() {
        let id = VersionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: VersionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
