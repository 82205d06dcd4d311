//! Timestamp helpers shared by the repositories and the enforcer.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC with
//! millisecond precision so that lexicographic order in SQL matches
//! chronological order.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;

/// Formats a timestamp for storage.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a stored timestamp. Returns `None` for anything that is not RFC 3339.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Parses an IANA timezone name such as `Europe/Zurich`.
pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}

/// The calendar date of `now` as observed in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Formats a calendar date the way scheduler runs record it (`YYYY-MM-DD`).
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Inverse of [`epoch_millis`]; out-of-range values clamp to the epoch.
pub fn from_epoch_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
