use std::collections::BTreeMap;

use replicast_types::{Millis, VersionId};

/// Constraints shared by point lookups and browse queries.
///
/// Every field is optional; an empty set of constraints matches any blob.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Exact version to select.
    pub version: Option<VersionId>,
    /// Point in time the blob's validity interval must cover.
    pub at: Option<Millis>,
    /// Properties that must be present with exactly these values
    /// (names compare case-insensitively).
    pub flags: BTreeMap<String, String>,
    /// Reject blobs created after this time.
    pub not_after: Option<Millis>,
    /// Reject blobs created before this time.
    pub not_before: Option<Millis>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
            && self.at.is_none()
            && self.flags.is_empty()
            && self.not_after.is_none()
            && self.not_before.is_none()
    }

    /// Checks the creation-time window.
    pub fn accepts_created(&self, created: Millis) -> bool {
        self.not_after.map_or(true, |limit| created <= limit)
            && self.not_before.map_or(true, |limit| created >= limit)
    }
}

/// Point lookup: best complete version of one key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub key: String,
    pub constraints: Constraints,
}

impl Query {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            constraints: Constraints::default(),
        }
    }

    pub fn version(mut self, version: VersionId) -> Self {
        self.constraints.version = Some(version);
        self
    }

    pub fn at(mut self, at: Millis) -> Self {
        self.constraints.at = Some(at);
        self
    }

    pub fn flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.flags.insert(name.into(), value.into());
        self
    }

    pub fn not_after(mut self, limit: Millis) -> Self {
        self.constraints.not_after = Some(limit);
        self
    }

    pub fn not_before(mut self, limit: Millis) -> Self {
        self.constraints.not_before = Some(limit);
        self
    }
}

/// Key selector for browse queries.
///
/// `*` and `%` act as wildcards. A pattern containing a wildcard matches any
/// key that starts with it (the pattern is implicitly followed by `*`).
/// Without wildcards the key must match exactly, and an empty pattern
/// matches every key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathPattern {
    All,
    Exact(String),
    Wildcard(Vec<String>),
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim_matches('/');
        if pattern.is_empty() {
            return PathPattern::All;
        }
        if pattern.contains(['*', '%']) {
            let pieces = pattern
                .split(['*', '%'])
                .map(str::to_string)
                .collect();
            PathPattern::Wildcard(pieces)
        } else {
            PathPattern::Exact(pattern.to_string())
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, PathPattern::Exact(_))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            PathPattern::All => true,
            PathPattern::Exact(exact) => exact == key,
            PathPattern::Wildcard(pieces) => glob_prefix_match(pieces, key),
        }
    }
}

/// Matches `pieces[0] * pieces[1] * ... *` against `key`. The trailing
/// implicit wildcard makes leftmost matching of each piece sufficient.
fn glob_prefix_match(pieces: &[String], key: &str) -> bool {
    let Some((first, rest)) = pieces.split_first() else {
        return true;
    };
    let Some(mut remaining) = key.strip_prefix(first.as_str()) else {
        return false;
    };
    for piece in rest {
        match remaining.find(piece.as_str()) {
            Some(pos) => remaining = &remaining[pos + piece.len()..],
            None => return false,
        }
    }
    true
}

/// Listing of blobs across keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrowseQuery {
    pub path: PathPattern,
    pub constraints: Constraints,
    /// Only report the best match per key.
    pub latest_only: bool,
    /// Maximum number of results, newest first.
    pub limit: Option<usize>,
}

impl BrowseQuery {
    pub fn new(path: &str) -> Self {
        Self {
            path: PathPattern::parse(path),
            constraints: Constraints::default(),
            latest_only: false,
            limit: None,
        }
    }

    pub fn latest_only(mut self) -> Self {
        self.latest_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }
}
