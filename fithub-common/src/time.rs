//! Timestamp utilities

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp for storage
///
/// Fixed-width RFC 3339 in UTC with milliseconds, so lexical order of stored
/// values equals chronological order.
pub fn to_db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp into UTC
pub fn parse_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Invalid timestamp '{}': {}", value, e)))
}

/// Whole days elapsed from `earlier` to `later`, never negative
pub fn whole_days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> i64 {
    (later - earlier).num_days().max(0)
}
