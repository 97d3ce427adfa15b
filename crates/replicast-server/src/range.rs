/// Outcome of evaluating a `Range` header against an object size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RangeSpec {
    Full,
    /// Inclusive `(first, last)` byte positions, in request order.
    Ranges(Vec<(u64, u64)>),
    Unsatisfiable,
}

/// Evaluates a `Range` header value. `None` selects the whole object.
///
/// Accepted forms are `a-b`, `a-` and `-n`, comma separated. A bound at or
/// past the end of the object makes the whole request unsatisfiable, as
/// does any other unit than `bytes`.
pub fn parse_range(header: Option<&str>, size: u64) -> RangeSpec {
    let Some(header) = header else {
        return RangeSpec::Full;
    };
    let Some(specs) = header.trim().strip_prefix("bytes=") else {
        return RangeSpec::Unsatisfiable;
    };

    let mut ranges = Vec::new();
    for spec in specs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match parse_one(spec, size) {
            Some(range) => ranges.push(range),
            None => return RangeSpec::Unsatisfiable,
        }
    }
    if ranges.is_empty() {
        RangeSpec::Unsatisfiable
    } else {
        RangeSpec::Ranges(ranges)
    }
}

fn parse_one(spec: &str, size: u64) -> Option<(u64, u64)> {
    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());
    if size == 0 {
        return None;
    }
    match (first.is_empty(), last.is_empty()) {
        (true, false) => {
            let n: u64 = last.parse().ok()?;
            if n == 0 {
                return None;
            }
            Some((size - n.min(size), size - 1))
        }
        (false, true) => {
            let first: u64 = first.parse().ok()?;
            (first < size).then_some((first, size - 1))
        }
        (false, false) => {
            let first: u64 = first.parse().ok()?;
            let last: u64 = last.parse().ok()?;
            (first <= last && last < size).then_some((first, last))
        }
        (true, true) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_header_is_full() {
        assert_eq!(parse_range(None, 10), RangeSpec::Full);
    }

    #[test]
    fn single_forms() {
        assert_eq!(parse_range(Some("bytes=2-5"), 10), RangeSpec::Ranges(vec![(2, 5)]));
        assert_eq!(parse_range(Some("bytes=7-"), 10), RangeSpec::Ranges(vec![(7, 9)]));
        assert_eq!(parse_range(Some("bytes=-3"), 10), RangeSpec::Ranges(vec![(7, 9)]));
        assert_eq!(parse_range(Some("bytes=-30"), 10), RangeSpec::Ranges(vec![(0, 9)]));
    }

    #[test]
    fn multiple_ranges_keep_order() {
        assert_eq!(
            parse_range(Some("bytes=6-7, 0-1"), 10),
            RangeSpec::Ranges(vec![(6, 7), (0, 1)])
        );
    }

    #[test]
    fn unsatisfiable() {
        for h in ["bytes=5-2", "bytes=10-", "bytes=3-10", "items=0-1", "bytes=", "bytes=-0", "bytes=a-b", "bytes=0-1,9-12"] {
            assert_eq!(parse_range(Some(h), 10), RangeSpec::Unsatisfiable, "{h}");
        }
        assert_eq!(parse_range(Some("bytes=0-0"), 0), RangeSpec::Unsatisfiable);
    }
}
