//! The single "which one is newer" comparator.
//!
//! Save-queue auto-save timing, checkpoint merging, history ordering, and
//! snapshot selection in the conflict resolver all go through here so they
//! share one tie-break: a known time is newer than an unknown one, and two
//! unknown times are equally old.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::datetime::parse_timestamp;

/// Compare two optional instants. `Greater` means `a` is newer.
pub fn compare_recency(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Compare two optional timestamp strings. Unparseable text counts as unknown.
pub fn compare_timestamps(a: Option<&str>, b: Option<&str>) -> Ordering {
    compare_recency(a.and_then(parse_timestamp), b.and_then(parse_timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_timestamp_is_greater() {
        assert_eq!(
            compare_timestamps(Some("2024-01-02"), Some("2024-01-01")),
            Ordering::Greater
        );
        assert_eq!(
            compare_timestamps(Some("2024-01-01T00:00:00Z"), Some("2024-01-01T00:00:01Z")),
            Ordering::Less
        );
    }

    #[test]
    fn known_beats_unknown() {
        assert_eq!(compare_timestamps(Some("2024-01-01"), None), Ordering::Greater);
        assert_eq!(compare_timestamps(None, Some("2024-01-01")), Ordering::Less);
        assert_eq!(
            compare_timestamps(Some("garbage"), Some("2024-01-01")),
            Ordering::Less
        );
    }

    #[test]
    fn two_unknowns_tie() {
        assert_eq!(compare_timestamps(None, None), Ordering::Equal);
        assert_eq!(compare_timestamps(Some("x"), Some("y")), Ordering::Equal);
    }

    #[test]
    fn mixed_formats_compare_by_instant() {
        assert_eq!(
            compare_timestamps(Some("2024-01-02"), Some("2024-01-02T00:00:00.000Z")),
            Ordering::Equal
        );
    }
}
