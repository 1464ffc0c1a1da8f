//! Check-in window rule

use chrono::{DateTime, Duration, Local, NaiveDate};
use rollcall_api::{AttendanceStatus, CheckInPayload};
use rollcall_util::{local_datetime, parse_payload_date, parse_payload_time, RollcallError, Result};

/// Classification of one check-in, with the inputs that decided it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowVerdict {
    pub status: AttendanceStatus,
    pub claimed_at: DateTime<Local>,
    pub observed_at: DateTime<Local>,
    /// observed - claimed, truncated to milliseconds
    pub delta: Duration,
}

impl WindowVerdict {
    pub fn delta_ms(&self) -> i64 {
        self.delta.num_milliseconds()
    }

    pub fn is_present(&self) -> bool {
        self.status == AttendanceStatus::Present
    }
}

/// Classify a check-in.
///
/// Present iff `0 <= observed - claimed <= tolerance`. A scan that appears to
/// predate its own QR code (clock skew, forged payload) is absent.
pub fn evaluate(
    claimed_at: DateTime<Local>,
    observed_at: DateTime<Local>,
    tolerance: Duration,
) -> WindowVerdict {
    let delta = Duration::milliseconds(observed_at.signed_duration_since(claimed_at).num_milliseconds());

    let status = if delta >= Duration::zero() && delta <= tolerance {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Absent
    };

    WindowVerdict {
        status,
        claimed_at,
        observed_at,
        delta,
    }
}

/// Extract the claimed instant and the attendance day from a QR payload
pub fn parse_claimed_at(payload: &CheckInPayload) -> Result<(NaiveDate, DateTime<Local>)> {
    if payload.subject_code.is_blank() {
        return Err(RollcallError::invalid_input("subject code is empty"));
    }

    let date = parse_payload_date(&payload.date).ok_or_else(|| {
        RollcallError::invalid_input(format!("unreadable date in QR payload: {:?}", payload.date))
    })?;
    let time = parse_payload_time(&payload.time).ok_or_else(|| {
        RollcallError::invalid_input(format!("unreadable time in QR payload: {:?}", payload.time))
    })?;
    let claimed_at = local_datetime(date, time).ok_or_else(|| {
        RollcallError::invalid_input(format!(
            "{} {} does not exist in the local time zone",
            payload.date, payload.time
        ))
    })?;

    Ok((date, claimed_at))
}
