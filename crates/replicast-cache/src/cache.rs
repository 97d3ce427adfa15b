use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use replicast_types::{Millis, VersionId};
use serde::Serialize;
use tracing::{debug, info};

use crate::blob::{Blob, BlobStatus};
use crate::error::{CacheError, CacheResult};
use crate::query::{BrowseQuery, Query};

/// All known versions of one key, oldest start time first.
type VersionList = Arc<Mutex<Vec<Arc<Blob>>>>;

/// Checksum-invalid version ids remembered at most at once.
pub const MAX_INVALID_VERSIONS: usize = 4096;

/// Aggregate counts for one entry of a folder listing.
///
/// `own_*` counts versions stored directly under the entry's key,
/// `nested_*` those of keys further below it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FolderStats {
    pub own_count: usize,
    pub own_size: u64,
    pub nested_count: usize,
    pub nested_size: u64,
}

/// Point-in-time counters over the whole cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub keys: usize,
    pub versions: usize,
    pub complete: usize,
    pub incomplete: usize,
    pub complete_bytes: u64,
}

/// Concurrent key -> version list map.
///
/// The map lock is only held for writing to add or drop keys. Operations on
/// one key lock that key's list while holding the map lock for reading, so a
/// list can never be detached from the map under a concurrent insert.
///
/// Versions discarded for a bad checksum are remembered, with the time they
/// were discarded, so late duplicates cannot bring them back.
pub struct ReplicaCache {
    entries: RwLock<HashMap<String, VersionList>>,
    invalid: Mutex<HashMap<VersionId, Millis>>,
}

impl ReplicaCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            invalid: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of keys.
    pub fn keys(&self) -> Vec<String> {
        let map = self.entries.read().expect("lock poisoned");
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Snapshot of a key's versions in list order.
    pub fn versions(&self, key: &str) -> Vec<Arc<Blob>> {
        let map = self.entries.read().expect("lock poisoned");
        match map.get(key) {
            Some(list) => list.lock().expect("lock poisoned").clone(),
            None => Vec::new(),
        }
    }

    /// Looks up one version of a key regardless of its state.
    pub fn find(&self, key: &str, version: VersionId) -> Option<Arc<Blob>> {
        let map = self.entries.read().expect("lock poisoned");
        let list = map.get(key)?.lock().expect("lock poisoned");
        list.iter().find(|b| b.version() == version).cloned()
    }

    /// Looks up a version by id alone, scanning every key.
    pub fn find_by_version(&self, version: VersionId) -> Option<Arc<Blob>> {
        let map = self.entries.read().expect("lock poisoned");
        map.values().find_map(|list| {
            list.lock()
                .expect("lock poisoned")
                .iter()
                .find(|b| b.version() == version)
                .cloned()
        })
    }

    /// Inserts `blob` unless its version is already present.
    ///
    /// Returns the blob now stored for that version and whether it was
    /// newly inserted. At most one blob per version id ever exists. Fails
    /// with [`CacheError::VersionInvalid`] for a discarded version.
    pub fn insert_if_absent(&self, blob: Arc<Blob>) -> CacheResult<(Arc<Blob>, bool)> {
        {
            let map = self.entries.read().expect("lock poisoned");
            if let Some(list) = map.get(blob.key()) {
                return self.insert_into(list, blob);
            }
        }
        let mut map = self.entries.write().expect("lock poisoned");
        let key = blob.key().to_string();
        let list = map.entry(key.clone()).or_default().clone();
        let result = self.insert_into(&list, blob);
        if result.is_err() && list.lock().expect("lock poisoned").is_empty() {
            map.remove(&key);
        }
        result
    }

    /// Returns the blob for `(key, version)`, creating an empty one if needed.
    pub fn get_or_create(&self, key: &str, version: VersionId, now: Millis) -> CacheResult<(Arc<Blob>, bool)> {
        if let Some(existing) = self.find(key, version) {
            return Ok((existing, false));
        }
        if self.is_invalid(version) {
            return Err(CacheError::VersionInvalid(version));
        }
        self.insert_if_absent(Arc::new(Blob::new_at(key, version, now)))
    }

    /// Stores an object that is complete from the start.
    pub fn insert_complete(
        &self,
        key: &str,
        version: VersionId,
        properties: BTreeMap<String, String>,
        payload: impl Into<Bytes>,
    ) -> CacheResult<Arc<Blob>> {
        let blob = Arc::new(Blob::complete(key, version, properties, payload)?);
        let (stored, inserted) = self.insert_if_absent(blob)?;
        if inserted {
            debug!(key, %version, "complete object inserted");
        }
        Ok(stored)
    }

    fn insert_into(&self, list: &VersionList, blob: Arc<Blob>) -> CacheResult<(Arc<Blob>, bool)> {
        let mut list = list.lock().expect("lock poisoned");
        if let Some(existing) = list.iter().find(|b| b.version() == blob.version()) {
            return Ok((existing.clone(), false));
        }
        // Checked under the list lock: a discard marks before it removes.
        if self.is_invalid(blob.version()) {
            return Err(CacheError::VersionInvalid(blob.version()));
        }
        list.push(blob.clone());
        list.sort_by_cached_key(|b| b.sort_key());
        Ok((blob, true))
    }

    /// Removes a version that failed its checksum and refuses to recreate
    /// it until the mark expires.
    pub fn discard_invalid(&self, key: &str, version: VersionId, now: Millis) -> Option<Arc<Blob>> {
        self.mark_invalid(version, now);
        self.remove(key, version)
    }

    /// Remembers `version` as invalid. The oldest mark is evicted once
    /// [`MAX_INVALID_VERSIONS`] are held.
    pub fn mark_invalid(&self, version: VersionId, now: Millis) {
        let mut invalid = self.invalid.lock().expect("lock poisoned");
        invalid.insert(version, now);
        if invalid.len() > MAX_INVALID_VERSIONS {
            let oldest = invalid.iter().min_by_key(|(_, at)| **at).map(|(v, _)| *v);
            if let Some(oldest) = oldest {
                invalid.remove(&oldest);
            }
        }
    }

    pub fn is_invalid(&self, version: VersionId) -> bool {
        self.invalid.lock().expect("lock poisoned").contains_key(&version)
    }

    /// Forgets invalid marks set before `cutoff`. Returns how many went.
    pub(crate) fn forget_invalid_before(&self, cutoff: Millis) -> usize {
        let mut invalid = self.invalid.lock().expect("lock poisoned");
        let before = invalid.len();
        invalid.retain(|_, at| *at >= cutoff);
        before - invalid.len()
    }

    /// Removes one version. Drops the key once its list is empty.
    pub fn remove(&self, key: &str, version: VersionId) -> Option<Arc<Blob>> {
        let mut map = self.entries.write().expect("lock poisoned");
        let list = map.get(key)?;
        let (removed, now_empty) = {
            let mut list = list.lock().expect("lock poisoned");
            let pos = list.iter().position(|b| b.version() == version)?;
            let removed = list.remove(pos);
            (removed, list.is_empty())
        };
        if now_empty {
            map.remove(key);
        }
        info!(key, %version, status = %removed.status(), "blob removed");
        Some(removed)
    }

    /// Re-sorts a key's list after a blob's start time became known.
    pub fn resort(&self, key: &str) {
        let map = self.entries.read().expect("lock poisoned");
        if let Some(list) = map.get(key) {
            list.lock()
                .expect("lock poisoned")
                .sort_by_cached_key(|b| b.sort_key());
        }
    }

    /// Best complete version of `query.key` satisfying its constraints:
    /// latest creation time, ties broken by the larger version id.
    pub fn lookup_best(&self, query: &Query) -> Option<Arc<Blob>> {
        best_of(self.versions(&query.key), query)
    }

    /// Complete blobs across all keys matching a browse query, newest first.
    pub fn find_all(&self, query: &BrowseQuery) -> Vec<Arc<Blob>> {
        let lists: Vec<VersionList> = {
            let map = self.entries.read().expect("lock poisoned");
            map.iter()
                .filter(|(key, _)| query.path.matches(key))
                .map(|(_, list)| list.clone())
                .collect()
        };

        let mut found = Vec::new();
        for list in lists {
            let snapshot = list.lock().expect("lock poisoned").clone();
            let mut matching = snapshot
                .into_iter()
                .filter(|b| b.is_complete() && b.matches(&query.constraints));
            if query.latest_only {
                if let Some(best) = matching.max_by_key(|b| b.rank()) {
                    found.push(best);
                }
            } else {
                found.extend(matching);
            }
        }

        found.sort_by_key(|b| std::cmp::Reverse(b.rank()));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        found
    }

    /// Immediate children of `prefix` in the `/`-separated key space.
    ///
    /// A key equal to the prefix is not listed.
    pub fn subfolders(&self, prefix: &str) -> BTreeMap<String, FolderStats> {
        let prefix = prefix.trim_matches('/');
        let map = self.entries.read().expect("lock poisoned");
        let mut out: BTreeMap<String, FolderStats> = BTreeMap::new();
        for (key, list) in map.iter() {
            let rest = if prefix.is_empty() {
                key.as_str()
            } else {
                match key.strip_prefix(prefix).and_then(|r| r.strip_prefix('/')) {
                    Some(rest) => rest,
                    None => continue,
                }
            };
            let rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                continue;
            }
            let (child, own) = match rest.split_once('/') {
                Some((child, _)) => (child, false),
                None => (rest, true),
            };
            let list = list.lock().expect("lock poisoned");
            let count = list.len();
            let size: u64 = list.iter().filter_map(|b| b.size()).sum();
            let stats = out.entry(child.to_string()).or_default();
            if own {
                stats.own_count += count;
                stats.own_size += size;
            } else {
                stats.nested_count += count;
                stats.nested_size += size;
            }
        }
        out
    }

    pub fn stats(&self) -> CacheStats {
        let map = self.entries.read().expect("lock poisoned");
        let mut stats = CacheStats {
            keys: map.len(),
            ..Default::default()
        };
        for list in map.values() {
            for blob in list.lock().expect("lock poisoned").iter() {
                stats.versions += 1;
                match blob.status() {
                    BlobStatus::Complete => {
                        stats.complete += 1;
                        stats.complete_bytes += blob.size().unwrap_or(0);
                    }
                    _ => stats.incomplete += 1,
                }
            }
        }
        stats
    }

    /// Runs `f` over every key's list with the map locked for writing,
    /// then drops keys whose list ended up empty.
    pub(crate) fn retain_lists<F>(&self, mut f: F)
    where
        F: FnMut(&str, &mut Vec<Arc<Blob>>),
    {
        let mut map = self.entries.write().expect("lock poisoned");
        map.retain(|key, list| {
            let mut list = list.lock().expect("lock poisoned");
            f(key, &mut list);
            !list.is_empty()
        });
    }
}

impl Default for ReplicaCache {
    fn default() -> Self {
        Self::new()
    }
}

fn best_of(candidates: Vec<Arc<Blob>>, query: &Query) -> Option<Arc<Blob>> {
    candidates
        .into_iter()
        .filter(|b| b.is_complete() && b.matches(&query.constraints))
        .max_by_key(|b| b.rank())
}
