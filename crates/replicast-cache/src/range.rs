use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

/// Set of disjoint, non-adjacent half-open byte ranges.
///
/// Used as the "still missing" bookkeeping of a section: it starts as one
/// range covering the whole section and shrinks as fragments arrive.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RangeSet {
    /// start -> end (exclusive)
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding the single range `[0, len)`, or nothing if `len == 0`.
    pub fn full(len: u64) -> Self {
        let mut ranges = BTreeMap::new();
        if len > 0 {
            ranges.insert(0, len);
        }
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of disjoint ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Total number of bytes covered.
    pub fn covered_bytes(&self) -> u64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    /// Remove `range` from the set. Returns how many bytes were removed,
    /// so zero means the range was already fully absent.
    pub fn remove(&mut self, range: Range<u64>) -> u64 {
        if range.start >= range.end {
            return 0;
        }
        let overlapping: Vec<(u64, u64)> = self
            .ranges
            .range(..range.end)
            .filter(|&(_, &end)| end > range.start)
            .map(|(&s, &e)| (s, e))
            .collect();

        let mut removed = 0;
        for (start, end) in overlapping {
            self.ranges.remove(&start);
            if start < range.start {
                self.ranges.insert(start, range.start);
            }
            if end > range.end {
                self.ranges.insert(range.end, end);
            }
            removed += end.min(range.end) - start.max(range.start);
        }
        removed
    }

    /// Returns `true` if any byte of `range` is in the set.
    pub fn intersects(&self, range: Range<u64>) -> bool {
        self.ranges
            .range(..range.end)
            .any(|(_, &end)| end > range.start)
    }

    /// Ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        self.ranges.iter().map(|(&s, &e)| s..e)
    }

    pub fn to_vec(&self) -> Vec<Range<u64>> {
        self.iter().collect()
    }
}

impl fmt::Debug for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn full_and_empty() {
        assert!(RangeSet::full(0).is_empty());
        let set = RangeSet::full(200);
        assert_eq!(set.to_vec(), vec![0..200]);
        assert_eq!(set.covered_bytes(), 200);
    }

    #[test]
    fn remove_middle_splits() {
        let mut set = RangeSet::full(200);
        assert_eq!(set.remove(50..100), 50);
        assert_eq!(set.to_vec(), vec![0..50, 100..200]);
    }

    #[test]
    fn remove_spanning_several_ranges() {
        let mut set = RangeSet::full(300);
        set.remove(50..100);
        set.remove(150..200);
        assert_eq!(set.remove(25..250), 125);
        assert_eq!(set.to_vec(), vec![0..25, 250..300]);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut set = RangeSet::full(100);
        assert_eq!(set.remove(0..40), 40);
        assert_eq!(set.remove(0..40), 0);
        assert_eq!(set.remove(10..20), 0);
        assert_eq!(set.to_vec(), vec![40..100]);
    }

    #[test]
    fn empty_range_is_noop() {
        let mut set = RangeSet::full(10);
        assert_eq!(set.remove(5..5), 0);
        assert_eq!(set.to_vec(), vec![0..10]);
    }

    #[test]
    fn intersects_checks_overlap() {
        let mut set = RangeSet::full(100);
        set.remove(20..80);
        assert!(set.intersects(10..30));
        assert!(!set.intersects(20..80));
        assert!(set.intersects(79..81));
    }

    proptest! {
        #[test]
        fn removing_everything_in_any_order_empties(
            cuts in proptest::collection::vec((0u64..1000, 1u64..200), 0..40)
        ) {
            let mut set = RangeSet::full(1000);
            let mut expected = vec![true; 1000];
            for (start, len) in cuts {
                let end = (start + len).min(1000);
                set.remove(start..end);
                for b in &mut expected[start as usize..end as usize] {
                    *b = false;
                }
            }
            let remaining: u64 = expected.iter().filter(|b| **b).count() as u64;
            prop_assert_eq!(set.covered_bytes(), remaining);
            set.remove(0..1000);
            prop_assert!(set.is_empty());
        }
    }
}
