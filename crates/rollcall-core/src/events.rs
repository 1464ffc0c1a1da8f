//! Core events emitted by the engine

use chrono::{DateTime, Local};
use rollcall_api::{AttendanceRecord, PermissionStatus};
use rollcall_util::{PermissionId, SubjectId, UserId, VenueId};

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    AttendanceRecorded { record: AttendanceRecord },

    VenueBooked {
        venue_id: VenueId,
        booked_by: UserId,
        until: DateTime<Local>,
    },

    /// Holder released a venue before its expiry
    VenueReleased { venue_id: VenueId, released_by: UserId },

    /// Sweep freed one or more lapsed bookings
    BookingsExpired { venue_ids: Vec<VenueId> },

    PermissionSubmitted {
        permission_id: PermissionId,
        student_id: UserId,
        subject_id: SubjectId,
    },

    PermissionReviewed {
        permission_id: PermissionId,
        student_id: UserId,
        status: PermissionStatus,
    },

    /// Policy was reloaded
    PolicyReloaded { venue_count: usize },
}

/// Result of an engine operation plus the events it produced
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<CoreEvent>,
}

impl<T> Outcome<T> {
    pub fn quiet(value: T) -> Self {
        Self {
            value,
            events: Vec::new(),
        }
    }

    pub fn with_event(value: T, event: CoreEvent) -> Self {
        Self {
            value,
            events: vec![event],
        }
    }
}
