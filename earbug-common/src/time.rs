//! Timestamp utilities
//!
//! Playback keys are RFC 3339 strings with up to nanosecond precision and a
//! `Z` suffix, e.g. `2024-03-01T12:00:00.123456789Z`.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Render a point in time as a playback key
pub fn format_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a playback key (any RFC 3339 timestamp) back into UTC
pub fn parse_key(key: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(key)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("invalid timestamp {:?}: {}", key, e)))
}
