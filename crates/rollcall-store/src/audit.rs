//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use rollcall_api::{AttendanceStatus, PermissionStatus};
use rollcall_util::{PermissionId, SubjectId, UserId, VenueId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// Policy loaded at startup
    PolicyLoaded { venue_count: usize },

    /// Config reload requested
    ConfigReloaded { success: bool },

    /// A QR check-in was classified
    CheckInEvaluated {
        student_id: UserId,
        subject_id: SubjectId,
        claimed_at: DateTime<Local>,
        observed_at: DateTime<Local>,
        delta_ms: i64,
        status: AttendanceStatus,
    },

    /// A teacher or admin recorded attendance by hand
    AttendanceRegistered {
        student_id: UserId,
        subject_id: SubjectId,
        date: NaiveDate,
        status: AttendanceStatus,
        registered_by: UserId,
        created: bool,
    },

    VenueAdded { venue_id: VenueId, added_by: UserId },

    VenueBooked {
        venue_id: VenueId,
        booked_by: UserId,
        until: DateTime<Local>,
    },

    /// Booking attempt on a venue somebody else holds
    BookingRejected {
        venue_id: VenueId,
        requested_by: UserId,
        holder: UserId,
    },

    VenueReleased { venue_id: VenueId, released_by: UserId },

    /// Lapsed booking freed by the sweep
    BookingExpired {
        venue_id: VenueId,
        holder: UserId,
        expired_at: DateTime<Local>,
    },

    /// A venue the sweep could not free
    SweepFailed { venue_id: VenueId, error: String },

    PermissionSubmitted {
        permission_id: PermissionId,
        student_id: UserId,
        subject_id: SubjectId,
    },

    PermissionReviewed {
        permission_id: PermissionId,
        reviewed_by: UserId,
        status: PermissionStatus,
    },

    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Row id, assigned by the store
    pub id: i64,

    pub timestamp: DateTime<Local>,

    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(rollcall_util::now(), event)
    }

    /// Event stamped with an explicit time
    pub fn at(timestamp: DateTime<Local>, event: AuditEventType) -> Self {
        Self {
            id: 0,
            timestamp,
            event,
        }
    }
}
