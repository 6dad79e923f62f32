//! Timestamp parsing and formatting with consistent behavior.
//!
//! Every timestamp the engine writes is RFC 3339 in UTC with millisecond
//! precision. Reading is more forgiving because stored records and merge
//! inputs come from older clients: naive date-times and bare dates are
//! accepted and interpreted as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Parses an RFC3339 timestamp string, returning an error if parsing fails.
///
/// # Examples
///
/// ```
/// use storyloom_domain::parse_datetime;
/// use chrono::Datelike;
///
/// let dt = parse_datetime("2024-01-15T10:30:00Z").unwrap();
/// assert_eq!(dt.year(), 2024);
/// ```
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// Leniently parses a stored timestamp.
///
/// Tries RFC 3339 first, then a naive `YYYY-MM-DDTHH:MM:SS[.fff]` (or with a
/// space separator), then a bare `YYYY-MM-DD` date at midnight UTC. Returns
/// `None` for anything else, including the empty string.
///
/// # Examples
///
/// ```
/// use storyloom_domain::parse_timestamp;
///
/// assert!(parse_timestamp("2024-01-02").is_some());
/// assert!(parse_timestamp("2024-01-02T08:00:00.250Z").is_some());
/// assert!(parse_timestamp("yesterday").is_none());
/// ```
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = parse_datetime(s) {
        return Some(dt);
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Formats a timestamp the way every persisted record stores it.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
