//! Time utilities for rollcall
//!
//! All policy decisions take `now` as an argument; this module only supplies
//! the wall clock at the edges and the conversions the payloads and the store
//! need.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `ROLLCALL_MOCK_TIME` environment variable overrides
//! the wall clock. The mock clock starts at the given instant and advances at
//! the real rate, which is handy for exercising booking expiry by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-09-01 08:55:00`)

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "ROLLCALL_MOCK_TIME";

/// Date format used in QR payloads and attendance keys
pub const PAYLOAD_DATE_FORMAT: &str = "%Y-%m-%d";

/// Time format emitted in QR payloads
pub const PAYLOAD_TIME_FORMAT: &str = "%H:%M:%S";

/// Offset between mock time and real time, fixed at first use.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // Wraps Local::now() for the mock clock
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive) = NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S")
            else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    expected_format = "%Y-%m-%d %H:%M:%S",
                    "Invalid mock time format"
                );
                return None;
            };

            match Local.from_local_datetime(&naive).earliest() {
                Some(mock_dt) => {
                    let offset = mock_dt.signed_duration_since(chrono::Local::now());
                    tracing::info!(
                        mock_time = %mock_time_str,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                None => {
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        "Mock time does not exist in the local timezone"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Parse a payload date (`YYYY-MM-DD`)
pub fn parse_payload_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), PAYLOAD_DATE_FORMAT).ok()
}

/// Parse a payload time of day. Accepts `HH:MM:SS[.fff]` and `HH:MM`.
pub fn parse_payload_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Resolve a local date and time to an absolute instant.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant; times
/// that do not exist (DST spring-forward gap) yield `None`.
pub fn local_datetime(date: NaiveDate, time: NaiveTime) -> Option<DateTime<Local>> {
    Local.from_local_datetime(&date.and_time(time)).earliest()
}

/// Milliseconds since the Unix epoch, as stored in the database
pub fn to_epoch_millis(dt: &DateTime<Local>) -> i64 {
    dt.timestamp_millis()
}

/// Inverse of [`to_epoch_millis`]
pub fn from_epoch_millis(ms: i64) -> Option<DateTime<Local>> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.with_timezone(&Local))
}

/// Convert whole minutes to a signed chrono duration
pub fn minutes(m: u64) -> chrono::Duration {
    chrono::Duration::minutes(i64::try_from(m).unwrap_or(i64::MAX / 60_000))
}

/// Format a DateTime for display with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}
