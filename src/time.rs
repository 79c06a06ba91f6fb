use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::BuchfinkError;

/// Unix timestamp in seconds, UTC.
pub type Timestamp = i64;

/// Lower bound for "all history" queries (2011-01-01).
pub const EPOCH_START: Timestamp = 1_293_840_000;
/// Upper bound for "all history" queries (2031-01-01).
pub const EPOCH_END: Timestamp = 1_924_992_000;

const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a UTC timestamp from any of the formats found in YAML snapshots,
/// CSV exports and the command line.
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }
    for fmt in [FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(day_start(date));
    }
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(secs);
    }
    Err(BuchfinkError::InvalidTimestamp(s.to_string()).into())
}

pub fn format_timestamp(ts: Timestamp) -> String {
    match Utc.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format(FORMAT).to_string(),
        None => ts.to_string(),
    }
}

/// Calendar day (UTC) a timestamp falls on.
pub fn to_date(ts: Timestamp) -> NaiveDate {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

pub fn day_start(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .timestamp()
}

/// First second of the given year.
pub fn year_start(year: i32) -> Result<Timestamp> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .map(day_start)
        .ok_or_else(|| BuchfinkError::InvalidTimestamp(year.to_string()).into())
}

pub fn now() -> Timestamp {
    Utc::now().timestamp()
}
