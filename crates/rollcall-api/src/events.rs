//! Event types for rollcalld -> client streaming

use chrono::{DateTime, Local};
use rollcall_util::{PermissionId, SubjectId, UserId, VenueId};
use serde::{Deserialize, Serialize};

use crate::{AttendanceRecord, PermissionStatus, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: rollcall_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// An attendance row was created or overwritten
    AttendanceRecorded { record: AttendanceRecord },

    /// A venue moved from free to booked
    VenueBooked {
        venue_id: VenueId,
        booked_by: UserId,
        until: DateTime<Local>,
    },

    /// The holder released a venue early
    VenueReleased { venue_id: VenueId, released_by: UserId },

    /// Lapsed bookings were freed by a sweep
    BookingsExpired { venue_ids: Vec<VenueId> },

    /// A student asked to be excused (teachers of the subject act on this)
    PermissionSubmitted {
        permission_id: PermissionId,
        student_id: UserId,
        subject_id: SubjectId,
    },

    /// A permission request was approved or rejected
    PermissionReviewed {
        permission_id: PermissionId,
        student_id: UserId,
        status: PermissionStatus,
    },

    /// Configuration was reloaded
    PolicyReloaded { venue_count: usize },

    /// Service is shutting down
    Shutdown,
}
