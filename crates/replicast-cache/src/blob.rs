use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use md5::{Digest, Md5};
use replicast_types::props::{self, normalize_md5, parse_millis};
use replicast_types::{now_ms, Millis, Validity, VersionId};
use replicast_wire::{decode_metadata, Fragment, Section};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::query::Constraints;
use crate::range::RangeSet;

/// Result of a completeness evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completeness {
    Incomplete,
    Complete,
    ChecksumInvalid,
}

/// Lifecycle of a blob. `Complete` and `ChecksumInvalid` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlobStatus {
    /// Created, nothing received yet.
    Empty = 0,
    PartiallyReceived = 1,
    Complete = 2,
    ChecksumInvalid = 3,
}

impl BlobStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BlobStatus::PartiallyReceived,
            2 => BlobStatus::Complete,
            3 => BlobStatus::ChecksumInvalid,
            _ => BlobStatus::Empty,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BlobStatus::Complete | BlobStatus::ChecksumInvalid)
    }

    pub fn completeness(self) -> Completeness {
        match self {
            BlobStatus::Complete => Completeness::Complete,
            BlobStatus::ChecksumInvalid => Completeness::ChecksumInvalid,
            _ => Completeness::Incomplete,
        }
    }
}

impl fmt::Display for BlobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlobStatus::Empty => "empty",
            BlobStatus::PartiallyReceived => "partial",
            BlobStatus::Complete => "complete",
            BlobStatus::ChecksumInvalid => "checksum-invalid",
        };
        f.write_str(s)
    }
}

/// One section being reassembled.
struct SectionBuf {
    data: Vec<u8>,
    missing: RangeSet,
}

impl SectionBuf {
    fn new(len: u64) -> Self {
        Self {
            data: vec![0; len as usize],
            missing: RangeSet::full(len),
        }
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Copies `data` at `offset` and returns the number of newly covered bytes.
    fn write(&mut self, offset: u64, data: &[u8]) -> u64 {
        let range = offset..offset + data.len() as u64;
        if !self.missing.intersects(range.clone()) {
            return 0;
        }
        self.data[range.start as usize..range.end as usize].copy_from_slice(data);
        self.missing.remove(range)
    }
}

enum Payload {
    /// No payload fragment seen and no recovery yet.
    Unknown,
    Assembling(SectionBuf),
    /// Checksum verified.
    Sealed(Bytes),
    /// Dropped after a checksum failure.
    Discarded,
}

struct Assembly {
    properties: BTreeMap<String, String>,
    metadata: Option<SectionBuf>,
    metadata_decoded: bool,
    metadata_corrupt: bool,
    headers_recovered: bool,
    payload: Payload,
}

impl Assembly {
    fn new() -> Self {
        Self {
            properties: BTreeMap::new(),
            metadata: None,
            metadata_decoded: false,
            metadata_corrupt: false,
            headers_recovered: false,
            payload: Payload::Unknown,
        }
    }

    fn metadata_complete(&self) -> bool {
        self.metadata_decoded || self.headers_recovered
    }

    fn property(&self, name: &str) -> Option<&str> {
        property_ci(&self.properties, name)
    }

    /// Sets a property, replacing an existing one whose name differs only by case.
    fn set_property(&mut self, name: &str, value: String) {
        let existing = self
            .properties
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned();
        match existing {
            Some(k) => {
                self.properties.insert(k, value);
            }
            None => {
                self.properties.insert(name.to_string(), value);
            }
        }
    }
}

fn property_ci<'a>(properties: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    properties
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

const UNKNOWN_SIZE: u64 = u64::MAX;

/// Lock-free view of the fields the cache sorts and sweeps by.
struct Summary {
    status: AtomicU8,
    valid_from: AtomicU64,
    valid_until: AtomicU64,
    created: AtomicU64,
    last_touched: AtomicU64,
    size: AtomicU64,
}

/// One version of one key, possibly still being reassembled.
///
/// All mutation goes through the internal lock; the scheduling summary is
/// published through atomics so cache code never needs that lock.
pub struct Blob {
    key: String,
    version: VersionId,
    arrived: Millis,
    inner: Mutex<Assembly>,
    summary: Summary,
}

impl Blob {
    pub fn new(key: impl Into<String>, version: VersionId) -> Self {
        Self::new_at(key, version, now_ms())
    }

    /// Creates an empty blob whose arrival (and default creation) time is `now`.
    pub fn new_at(key: impl Into<String>, version: VersionId, now: Millis) -> Self {
        Self {
            key: key.into(),
            version,
            arrived: now,
            inner: Mutex::new(Assembly::new()),
            summary: Summary {
                status: AtomicU8::new(BlobStatus::Empty as u8),
                valid_from: AtomicU64::new(0),
                valid_until: AtomicU64::new(Millis::MAX),
                created: AtomicU64::new(now),
                last_touched: AtomicU64::new(now),
                size: AtomicU64::new(UNKNOWN_SIZE),
            },
        }
    }

    /// Builds a blob that is complete from the start, e.g. for a local upload.
    ///
    /// Fails with [`CacheError::ChecksumInvalid`] if `payload` does not match
    /// the `Content-MD5` property (or the property is missing).
    pub fn complete(
        key: impl Into<String>,
        version: VersionId,
        properties: BTreeMap<String, String>,
        payload: impl Into<Bytes>,
    ) -> CacheResult<Self> {
        let blob = Self::new(key, version);
        blob.apply_headers(properties);
        blob.set_payload(payload.into().to_vec());
        match blob.recompute_completeness() {
            Completeness::Complete => Ok(blob),
            _ => Err(CacheError::ChecksumInvalid(version)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn status(&self) -> BlobStatus {
        BlobStatus::from_u8(self.summary.status.load(Ordering::Acquire))
    }

    /// Last evaluated completeness. See [`Blob::recompute_completeness`].
    pub fn completeness(&self) -> Completeness {
        self.status().completeness()
    }

    pub fn is_complete(&self) -> bool {
        self.status() == BlobStatus::Complete
    }

    pub fn validity(&self) -> Validity {
        Validity::new(
            self.summary.valid_from.load(Ordering::Relaxed),
            self.summary.valid_until.load(Ordering::Relaxed),
        )
    }

    pub fn start_time(&self) -> Millis {
        self.summary.valid_from.load(Ordering::Relaxed)
    }

    pub fn end_time(&self) -> Millis {
        self.summary.valid_until.load(Ordering::Relaxed)
    }

    pub fn created(&self) -> Millis {
        self.summary.created.load(Ordering::Relaxed)
    }

    /// Time the blob was first seen locally.
    pub fn arrived(&self) -> Millis {
        self.arrived
    }

    pub fn last_touched(&self) -> Millis {
        self.summary.last_touched.load(Ordering::Relaxed)
    }

    /// Payload size, once any payload fragment or recovery has established it.
    pub fn size(&self) -> Option<u64> {
        match self.summary.size.load(Ordering::Relaxed) {
            UNKNOWN_SIZE => None,
            size => Some(size),
        }
    }

    pub fn covers(&self, at: Millis) -> bool {
        self.validity().covers(at)
    }

    /// Ordering key inside a version list: oldest start time first.
    pub(crate) fn sort_key(&self) -> (Millis, Millis, VersionId) {
        (self.start_time(), self.created(), self.version)
    }

    /// Ranking for best-match selection: newest creation, then larger id.
    pub(crate) fn rank(&self) -> (Millis, VersionId) {
        (self.created(), self.version)
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.lock().property(name).map(str::to_string)
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.lock().properties.clone()
    }

    /// `OriginalFileName` if known, else the last segment of the key.
    pub fn original_name(&self) -> String {
        self.property(props::ORIGINAL_FILE_NAME).unwrap_or_else(|| {
            self.key
                .rsplit('/')
                .find(|s| !s.is_empty())
                .unwrap_or(&self.key)
                .to_string()
        })
    }

    pub fn content_type(&self) -> String {
        self.property(props::CONTENT_TYPE)
            .unwrap_or_else(|| props::DEFAULT_CONTENT_TYPE.to_string())
    }

    /// The verified payload. `None` unless the blob is complete.
    pub fn payload(&self) -> Option<Bytes> {
        match &self.lock().payload {
            Payload::Sealed(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }

    pub fn metadata_complete(&self) -> bool {
        self.lock().metadata_complete()
    }

    /// Byte ranges of the payload still missing.
    ///
    /// `None` while the payload size is unknown; empty once every byte is in.
    pub fn missing_payload_ranges(&self) -> Option<Vec<Range<u64>>> {
        match &self.lock().payload {
            Payload::Unknown => None,
            Payload::Assembling(buf) => Some(buf.missing.to_vec()),
            Payload::Sealed(_) | Payload::Discarded => Some(Vec::new()),
        }
    }

    /// Merges a fragment using the current wall time.
    pub fn merge(&self, fragment: &Fragment) -> CacheResult<u64> {
        self.merge_at(fragment, now_ms())
    }

    /// Copies a fragment's bytes into the matching section.
    ///
    /// Returns the number of previously missing bytes that were filled.
    /// Duplicates and merges into a terminal blob are no-ops. Completeness
    /// is not re-evaluated here.
    pub fn merge_at(&self, fragment: &Fragment, now: Millis) -> CacheResult<u64> {
        if fragment.version != self.version || fragment.key != self.key {
            return Err(CacheError::WrongTarget {
                key: fragment.key.clone(),
                version: fragment.version,
            });
        }

        let mut inner = self.lock();
        if self.status().is_terminal() {
            return Ok(0);
        }

        let declared = u64::from(fragment.section_len);
        let offset = u64::from(fragment.offset);
        let filled = match fragment.section {
            Section::Metadata => {
                if inner.metadata_decoded {
                    0
                } else {
                    let buf = inner.metadata.get_or_insert_with(|| SectionBuf::new(declared));
                    if buf.len() != declared {
                        return Err(self.length_mismatch("metadata", buf.len(), declared));
                    }
                    let filled = buf.write(offset, &fragment.data);
                    if buf.missing.is_empty() {
                        self.decode_metadata(&mut inner);
                    }
                    filled
                }
            }
            Section::Payload => {
                if matches!(inner.payload, Payload::Unknown) {
                    inner.payload = Payload::Assembling(SectionBuf::new(declared));
                    self.summary.size.store(declared, Ordering::Relaxed);
                }
                match &mut inner.payload {
                    Payload::Assembling(buf) => {
                        if buf.len() != declared {
                            return Err(self.length_mismatch("payload", buf.len(), declared));
                        }
                        buf.write(offset, &fragment.data)
                    }
                    _ => 0,
                }
            }
        };

        self.touch(now);
        if self.status() == BlobStatus::Empty {
            self.publish_status(BlobStatus::PartiallyReceived);
        }
        Ok(filled)
    }

    /// Installs properties recovered out of band (HTTP response headers).
    ///
    /// Marks the metadata section complete. Names that differ only by case
    /// replace the existing entry.
    pub fn apply_headers<I>(&self, headers: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut inner = self.lock();
        if self.status().is_terminal() {
            return;
        }
        for (name, value) in headers {
            inner.set_property(&name, value);
        }
        inner.headers_recovered = true;
        inner.metadata_corrupt = false;
        self.refresh_summary(&inner);
        self.touch(now_ms());
    }

    /// Replaces the payload with a fully recovered body.
    pub fn set_payload(&self, body: Vec<u8>) {
        let mut inner = self.lock();
        if self.status().is_terminal() {
            return;
        }
        let len = body.len() as u64;
        inner.payload = Payload::Assembling(SectionBuf {
            data: body,
            missing: RangeSet::new(),
        });
        self.summary.size.store(len, Ordering::Relaxed);
        self.touch(now_ms());
    }

    /// Fills one recovered byte range of a payload whose size is known.
    pub fn add_byte_range(&self, offset: u64, data: &[u8]) -> CacheResult<u64> {
        let mut inner = self.lock();
        if self.status().is_terminal() {
            return Ok(0);
        }
        let Payload::Assembling(buf) = &mut inner.payload else {
            return Err(CacheError::SizeUnknown(self.version));
        };
        let end = offset.saturating_add(data.len() as u64);
        if end > buf.len() {
            return Err(CacheError::RangeOutOfBounds {
                version: self.version,
                offset,
                end,
                size: buf.len(),
            });
        }
        let filled = buf.write(offset, data);
        self.touch(now_ms());
        Ok(filled)
    }

    /// Re-evaluates completeness.
    ///
    /// When the payload and metadata are both in, the payload's MD5 is
    /// compared with `Content-MD5`. A match seals the payload and the blob
    /// becomes `Complete`; a mismatch or a missing checksum makes it
    /// `ChecksumInvalid`. Both outcomes are final.
    pub fn recompute_completeness(&self) -> Completeness {
        self.settle().0
    }

    /// [`Blob::recompute_completeness`], also reporting whether this call
    /// moved the blob into its terminal state. Exactly one caller ever sees
    /// `true`.
    pub fn settle(&self) -> (Completeness, bool) {
        let mut inner = self.lock();
        let status = self.status();
        if status.is_terminal() {
            return (status.completeness(), false);
        }
        if inner.metadata_corrupt {
            inner.payload = Payload::Discarded;
            self.publish_status(BlobStatus::ChecksumInvalid);
            warn!(key = %self.key, version = %self.version, "metadata section undecodable");
            return (Completeness::ChecksumInvalid, true);
        }
        self.refresh_summary(&inner);

        let assembled = matches!(&inner.payload, Payload::Assembling(buf) if buf.missing.is_empty());
        if !assembled || !inner.metadata_complete() {
            return (Completeness::Incomplete, false);
        }

        let expected = inner.property(props::CONTENT_MD5).map(normalize_md5);
        let Payload::Assembling(buf) = std::mem::replace(&mut inner.payload, Payload::Discarded)
        else {
            return (Completeness::Incomplete, false);
        };
        let actual = hex::encode(Md5::digest(&buf.data));

        match expected {
            Some(expected) if expected == actual => {
                inner.payload = Payload::Sealed(Bytes::from(buf.data));
                self.publish_status(BlobStatus::Complete);
                debug!(key = %self.key, version = %self.version, size = self.size().unwrap_or(0), "blob complete");
                (Completeness::Complete, true)
            }
            expected => {
                self.publish_status(BlobStatus::ChecksumInvalid);
                warn!(
                    key = %self.key,
                    version = %self.version,
                    expected = expected.as_deref().unwrap_or("<missing>"),
                    actual = %actual,
                    "payload checksum mismatch"
                );
                (Completeness::ChecksumInvalid, true)
            }
        }
    }

    /// Checks query constraints other than the key and completeness.
    pub fn matches(&self, constraints: &Constraints) -> bool {
        if constraints.version.is_some_and(|v| v != self.version) {
            return false;
        }
        if constraints.at.is_some_and(|at| !self.covers(at)) {
            return false;
        }
        if !constraints.accepts_created(self.created()) {
            return false;
        }
        if constraints.flags.is_empty() {
            return true;
        }
        let inner = self.lock();
        constraints
            .flags
            .iter()
            .all(|(name, value)| inner.property(name) == Some(value.as_str()))
    }

    fn decode_metadata(&self, inner: &mut Assembly) {
        let Some(buf) = inner.metadata.take() else {
            return;
        };
        match decode_metadata(&buf.data) {
            Ok(decoded) => {
                for (name, value) in decoded {
                    // Recovered headers win over multicast metadata.
                    if !inner.headers_recovered || inner.property(&name).is_none() {
                        inner.set_property(&name, value);
                    }
                }
                inner.metadata_decoded = true;
                self.refresh_summary(inner);
            }
            Err(e) => {
                warn!(key = %self.key, version = %self.version, error = %e, "bad metadata section");
                inner.metadata_corrupt = !inner.headers_recovered;
            }
        }
    }

    fn refresh_summary(&self, inner: &Assembly) {
        let from = inner.property(props::VALID_FROM).and_then(parse_millis).unwrap_or(0);
        let until = inner
            .property(props::VALID_UNTIL)
            .and_then(parse_millis)
            .unwrap_or(Millis::MAX);
        let created = inner
            .property(props::CREATED)
            .and_then(parse_millis)
            .unwrap_or(self.arrived);
        self.summary.valid_from.store(from, Ordering::Relaxed);
        self.summary.valid_until.store(until, Ordering::Relaxed);
        self.summary.created.store(created, Ordering::Relaxed);
    }

    fn touch(&self, now: Millis) {
        self.summary.last_touched.fetch_max(now, Ordering::Relaxed);
    }

    fn publish_status(&self, status: BlobStatus) {
        self.summary.status.store(status as u8, Ordering::Release);
    }

    fn length_mismatch(&self, section: &'static str, established: u64, declared: u64) -> CacheError {
        CacheError::LengthMismatch {
            version: self.version,
            section,
            established,
            declared,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Assembly> {
        self.inner.lock().expect("blob lock poisoned")
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("key", &self.key)
            .field("version", &self.version)
            .field("status", &self.status())
            .field("validity", &self.validity())
            .field("created", &self.created())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use replicast_wire::FragmentEncoder;

    pub(crate) fn props_for(payload: &[u8], from: Millis, until: Millis) -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        p.insert(props::VALID_FROM.to_string(), from.to_string());
        p.insert(props::VALID_UNTIL.to_string(), until.to_string());
        p.insert(props::CREATED.to_string(), from.to_string());
        p.insert(props::CONTENT_MD5.to_string(), hex::encode(Md5::digest(payload)));
        p
    }

    pub(crate) fn fragments(
        key: &str,
        version: VersionId,
        props: &BTreeMap<String, String>,
        payload: &[u8],
        size: usize,
    ) -> Vec<Fragment> {
        FragmentEncoder::new(size)
            .fragments(key, version, props, payload)
            .unwrap()
    }

    #[test]
    fn in_order_fragments_complete() {
        let payload = b"0123456789";
        let v = VersionId::new();
        let p = props_for(payload, 100, 200);
        let blob = Blob::new_at("DET/A", v, 50);
        assert_eq!(blob.status(), BlobStatus::Empty);

        for f in fragments("DET/A", v, &p, payload, 4) {
            blob.merge_at(&f, 60).unwrap();
        }
        assert_eq!(blob.recompute_completeness(), Completeness::Complete);
        assert_eq!(blob.payload().unwrap().as_ref(), payload);
        assert_eq!(blob.validity(), Validity::new(100, 200));
        assert_eq!(blob.created(), 100);
        assert_eq!(blob.size(), Some(10));
        assert_eq!(blob.last_touched(), 60);
    }

    #[test]
    fn partial_blob_reports_missing_ranges() {
        let payload = b"0123456789";
        let v = VersionId::new();
        let p = props_for(payload, 0, 10);
        let blob = Blob::new("k", v);
        assert!(blob.missing_payload_ranges().is_none());

        let frags = fragments("k", v, &p, payload, 4);
        // all metadata, and payload fragments [0,4) and [8,10)
        for f in frags.iter().filter(|f| !(f.section == Section::Payload && f.offset == 4)) {
            blob.merge(f).unwrap();
        }
        assert_eq!(blob.status(), BlobStatus::PartiallyReceived);
        assert!(blob.metadata_complete());
        assert_eq!(blob.recompute_completeness(), Completeness::Incomplete);
        assert_eq!(blob.missing_payload_ranges(), Some(vec![4..8]));
        assert!(blob.payload().is_none());
    }

    #[test]
    fn duplicates_are_idempotent() {
        let payload = b"abcdefgh";
        let v = VersionId::new();
        let p = props_for(payload, 0, 10);
        let blob = Blob::new("k", v);
        let frags = fragments("k", v, &p, payload, 3);
        for f in &frags {
            blob.merge(f).unwrap();
        }
        for f in &frags {
            assert_eq!(blob.merge(f).unwrap(), 0);
        }
        assert_eq!(blob.recompute_completeness(), Completeness::Complete);
        assert_eq!(blob.payload().unwrap().as_ref(), payload);
    }

    #[test]
    fn only_first_settle_reports_transition() {
        let payload = b"abcdefgh";
        let v = VersionId::new();
        let blob = Blob::new("k", v);
        for f in fragments("k", v, &props_for(payload, 0, 10), payload, 3) {
            blob.merge(&f).unwrap();
        }
        assert_eq!(blob.settle(), (Completeness::Complete, true));
        assert_eq!(blob.settle(), (Completeness::Complete, false));

        let bad = Blob::new("k", v);
        for f in fragments("k", v, &props_for(b"other", 0, 10), payload, 3) {
            bad.merge(&f).unwrap();
        }
        assert_eq!(bad.settle(), (Completeness::ChecksumInvalid, true));
        assert_eq!(bad.settle(), (Completeness::ChecksumInvalid, false));
    }

    #[test]
    fn shuffled_order_gives_same_result() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let v = VersionId::new();
        let p = props_for(&payload, 0, 10);
        let mut frags = fragments("k", v, &p, &payload, 97);
        let mut rng = rand::thread_rng();
        for _ in 0..5 {
            frags.shuffle(&mut rng);
            let blob = Blob::new("k", v);
            for f in &frags {
                blob.merge(f).unwrap();
            }
            assert_eq!(blob.recompute_completeness(), Completeness::Complete);
            assert_eq!(blob.payload().unwrap().as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn empty_payload_completes() {
        let v = VersionId::new();
        let p = props_for(b"", 0, 10);
        let blob = Blob::new("k", v);
        for f in fragments("k", v, &p, b"", 16) {
            blob.merge(&f).unwrap();
        }
        assert_eq!(blob.recompute_completeness(), Completeness::Complete);
        assert_eq!(blob.size(), Some(0));
    }

    #[test]
    fn checksum_mismatch_is_terminal() {
        let payload = b"payload";
        let v = VersionId::new();
        let mut p = props_for(payload, 0, 10);
        p.insert(props::CONTENT_MD5.to_string(), hex::encode(Md5::digest(b"other")));
        let blob = Blob::new("k", v);
        let frags = fragments("k", v, &p, payload, 4);
        for f in &frags {
            blob.merge(f).unwrap();
        }
        assert_eq!(blob.recompute_completeness(), Completeness::ChecksumInvalid);
        assert_eq!(blob.status(), BlobStatus::ChecksumInvalid);
        assert!(blob.payload().is_none());
        // terminal: further merges and evaluations change nothing
        assert_eq!(blob.merge(&frags[0]).unwrap(), 0);
        assert_eq!(blob.recompute_completeness(), Completeness::ChecksumInvalid);
    }

    #[test]
    fn missing_checksum_is_invalid() {
        let payload = b"payload";
        let v = VersionId::new();
        let mut p = props_for(payload, 0, 10);
        p.remove(props::CONTENT_MD5);
        let blob = Blob::new("k", v);
        for f in fragments("k", v, &p, payload, 4) {
            blob.merge(&f).unwrap();
        }
        assert_eq!(blob.recompute_completeness(), Completeness::ChecksumInvalid);
    }

    #[test]
    fn uppercase_dashed_checksum_accepted() {
        let payload = b"payload";
        let v = VersionId::new();
        let mut p = props_for(payload, 0, 10);
        let md5 = hex::encode_upper(Md5::digest(payload));
        p.insert(props::CONTENT_MD5.to_string(), format!("{}-{}", &md5[..16], &md5[16..]));
        let blob = Blob::complete("k", v, p, payload.to_vec()).unwrap();
        assert!(blob.is_complete());
    }

    #[test]
    fn conflicting_section_length_rejected() {
        let v = VersionId::new();
        let blob = Blob::new("k", v);
        let mk = |len: u32| Fragment {
            key: "k".into(),
            version: v,
            section: Section::Payload,
            section_len: len,
            offset: 0,
            data: Bytes::from_static(b"ab"),
        };
        blob.merge(&mk(10)).unwrap();
        let err = blob.merge(&mk(12)).unwrap_err();
        assert!(matches!(err, CacheError::LengthMismatch { established: 10, declared: 12, .. }));
    }

    #[test]
    fn wrong_target_rejected() {
        let v = VersionId::new();
        let blob = Blob::new("k", v);
        let p = props_for(b"x", 0, 1);
        let f = &fragments("other", v, &p, b"x", 4)[0];
        assert!(matches!(blob.merge(f), Err(CacheError::WrongTarget { .. })));
        let f = &fragments("k", VersionId::new(), &p, b"x", 4)[0];
        assert!(matches!(blob.merge(f), Err(CacheError::WrongTarget { .. })));
    }

    #[test]
    fn recovery_by_headers_and_ranges() {
        let payload = b"0123456789";
        let v = VersionId::new();
        let p = props_for(payload, 5, 50);
        let blob = Blob::new("k", v);
        // only payload fragments [0,4) and [8,10) arrive, no metadata
        for f in fragments("k", v, &p, payload, 4)
            .iter()
            .filter(|f| f.section == Section::Payload && f.offset != 4)
        {
            blob.merge(f).unwrap();
        }
        assert!(!blob.metadata_complete());
        assert_eq!(blob.missing_payload_ranges(), Some(vec![4..8]));

        blob.apply_headers(p.iter().map(|(k, v)| (k.to_lowercase(), v.clone())));
        assert_eq!(blob.recompute_completeness(), Completeness::Incomplete);
        assert_eq!(blob.start_time(), 5);

        assert_eq!(blob.add_byte_range(4, b"4567").unwrap(), 4);
        assert_eq!(blob.recompute_completeness(), Completeness::Complete);
        assert_eq!(blob.payload().unwrap().as_ref(), payload);
    }

    #[test]
    fn add_byte_range_requires_known_size() {
        let blob = Blob::new("k", VersionId::new());
        assert!(matches!(blob.add_byte_range(0, b"x"), Err(CacheError::SizeUnknown(_))));
        blob.set_payload(vec![0; 4]);
        assert!(matches!(
            blob.add_byte_range(2, b"xyz"),
            Err(CacheError::RangeOutOfBounds { end: 5, size: 4, .. })
        ));
    }

    #[test]
    fn property_lookup_is_case_insensitive() {
        let blob = Blob::new("a/b/c.fits", VersionId::new());
        blob.apply_headers([("content-md5".to_string(), "x".to_string())]);
        blob.apply_headers([("Content-MD5".to_string(), "y".to_string())]);
        assert_eq!(blob.property("CONTENT-MD5").as_deref(), Some("y"));
        assert_eq!(blob.properties().len(), 1);
        assert_eq!(blob.original_name(), "c.fits");
        assert_eq!(blob.content_type(), props::DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn missing_time_properties_default() {
        let blob = Blob::new_at("k", VersionId::new(), 777);
        blob.apply_headers(Vec::new());
        assert_eq!(blob.validity(), Validity::unbounded());
        assert_eq!(blob.created(), 777);
    }

    #[test]
    fn matches_constraints() {
        let payload = b"x";
        let v = VersionId::new();
        let mut p = props_for(payload, 100, 200);
        p.insert("Mode".into(), "dark".into());
        let blob = Blob::complete("k", v, p, payload.to_vec()).unwrap();

        assert!(blob.matches(&Constraints::default()));
        let at = |t| Constraints { at: Some(t), ..Default::default() };
        assert!(blob.matches(&at(100)));
        assert!(!blob.matches(&at(200)));
        assert!(!blob.matches(&Constraints { version: Some(VersionId::new()), ..Default::default() }));

        let mut flags = Constraints::default();
        flags.flags.insert("mode".into(), "dark".into());
        assert!(blob.matches(&flags));
        flags.flags.insert("mode".into(), "flat".into());
        assert!(!blob.matches(&flags));

        assert!(!blob.matches(&Constraints { not_after: Some(99), ..Default::default() }));
        assert!(!blob.matches(&Constraints { not_before: Some(101), ..Default::default() }));
    }

    #[test]
    fn corrupt_metadata_invalidates() {
        let v = VersionId::new();
        let blob = Blob::new("k", v);
        let f = Fragment {
            key: "k".into(),
            version: v,
            section: Section::Metadata,
            section_len: 3,
            offset: 0,
            data: Bytes::from_static(&[0xff, 0xff, 0xff]),
        };
        blob.merge(&f).unwrap();
        assert_eq!(blob.recompute_completeness(), Completeness::ChecksumInvalid);
    }

    fn arrival_order() -> impl proptest::strategy::Strategy<Value = (Vec<u8>, usize, Vec<usize>)> {
        use proptest::prelude::*;
        (proptest::collection::vec(any::<u8>(), 0..2000), 16usize..300).prop_flat_map(
            |(payload, size)| {
                let count = fragments("K", VersionId::new(), &props_for(&payload, 0, 10), &payload, size).len();
                let order = Just((0..count).collect::<Vec<_>>()).prop_shuffle();
                (Just(payload), Just(size), order)
            },
        )
    }

    proptest::proptest! {
        #[test]
        fn any_arrival_order_assembles(
            (payload, size, order) in arrival_order(),
            repeats in proptest::collection::vec(proptest::prelude::any::<proptest::sample::Index>(), 0..16),
        ) {
            let v = VersionId::new();
            let frags = fragments("K", v, &props_for(&payload, 0, 10), &payload, size);
            let blob = Blob::new("K", v);
            for &i in &order {
                blob.merge(&frags[i]).unwrap();
            }
            for r in &repeats {
                blob.merge(&frags[r.index(frags.len())]).unwrap();
            }
            proptest::prop_assert_eq!(blob.recompute_completeness(), Completeness::Complete);
            let got = blob.payload().unwrap();
            proptest::prop_assert_eq!(got.as_ref(), payload.as_slice());
        }
    }
}
