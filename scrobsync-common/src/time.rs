//! Timestamp utilities
//!
//! Listen timestamps are whole UTC seconds: the remote listen-history
//! protocol has second granularity and the idempotency key must compare
//! exactly after a round trip through storage.

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp, truncated to whole seconds
pub fn now() -> DateTime<Utc> {
    truncate_to_seconds(Utc::now())
}

/// Drop the sub-second part of a timestamp
pub fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_unix_seconds(ts.timestamp()).unwrap_or(ts)
}

/// Storage representation of a listen timestamp
pub fn to_unix_seconds(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

/// Convert a stored unix timestamp back to UTC
///
/// Returns `None` for values outside chrono's representable range.
pub fn from_unix_seconds(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
