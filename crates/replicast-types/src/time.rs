use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the UNIX epoch.
pub type Millis = u64;

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn now_ms() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Half-open validity interval `[from, until)` in milliseconds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Validity {
    pub from: Millis,
    pub until: Millis,
}

impl Validity {
    pub fn new(from: Millis, until: Millis) -> Self {
        Self { from, until }
    }

    /// An interval that covers every point in time.
    pub const fn unbounded() -> Self {
        Self {
            from: 0,
            until: Millis::MAX,
        }
    }

    /// Returns `true` if `at` falls inside the interval.
    pub fn covers(&self, at: Millis) -> bool {
        self.from <= at && at < self.until
    }

    /// Returns `true` if the interval ended strictly before `now`.
    pub fn expired_at(&self, now: Millis) -> bool {
        self.until < now
    }
}

impl Default for Validity {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl fmt::Debug for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validity[{}, {})", self.from, self.until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn covers_is_half_open() {
        let v = Validity::new(1000, 2000);
        assert!(!v.covers(999));
        assert!(v.covers(1000));
        assert!(v.covers(1999));
        assert!(!v.covers(2000));
    }

    #[test]
    fn unbounded_covers_everything() {
        let v = Validity::unbounded();
        assert!(v.covers(0));
        assert!(v.covers(now_ms()));
        assert!(!v.expired_at(now_ms()));
    }

    #[test]
    fn expiry_is_strict() {
        let v = Validity::new(0, 500);
        assert!(!v.expired_at(500));
        assert!(v.expired_at(501));
    }

    #[test]
    fn now_produces_reasonable_timestamp() {
        // Should be after 2020-01-01 (1577836800000 ms)
        assert!(now_ms() > 1_577_836_800_000);
    }

    proptest! {
        #[test]
        fn covers_matches_bounds(from in 0u64..10_000, len in 0u64..10_000, at in 0u64..30_000) {
            let v = Validity::new(from, from + len);
            prop_assert_eq!(v.covers(at), at >= from && at < from + len);
        }
    }
}
