//! Display formatting for timestamps.
//!
//! Every user-facing timestamp renders in UTC+7 (Asia/Jakarta) regardless
//! of server locale: `DD/MM/YYYY` date portion, 24-hour `HH:MM:SS` time
//! portion, two-digit components.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

const JAKARTA_OFFSET_SECS: i32 = 7 * 3600;

fn jakarta() -> FixedOffset {
    FixedOffset::east_opt(JAKARTA_OFFSET_SECS).expect("UTC+7 is a valid offset")
}

pub fn date_formatted(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&jakarta()).format("%d/%m/%Y").to_string()
}

pub fn time_formatted(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&jakarta()).format("%H:%M:%S").to_string()
}

/// Combined `date time` rendering used in tables and CSV rows.
pub fn datetime_formatted(ts: DateTime<Utc>) -> String {
    format!("{} {}", date_formatted(ts), time_formatted(ts))
}

/// Converts caller-supplied epoch milliseconds into a `DateTime<Utc>`.
/// `None` when the value falls outside chrono's representable range.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Midnight of the current Jakarta day, expressed in UTC. Used by the
/// `today` log-filter bucket.
pub fn jakarta_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let local_midnight = now
        .with_timezone(&jakarta())
        .date_naive()
        .and_time(NaiveTime::MIN);
    let utc_naive = local_midnight - Duration::seconds(i64::from(JAKARTA_OFFSET_SECS));
    DateTime::from_naive_utc_and_offset(utc_naive, Utc)
}
