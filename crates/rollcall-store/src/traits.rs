//! Store trait definitions

use chrono::{DateTime, Local, NaiveDate};
use rollcall_api::{AttendanceRecord, BookingState, PermissionRequest, PermissionStatus};
use rollcall_util::{PermissionId, SubjectId, UserId, VenueId};

use crate::{AuditEvent, StoreResult};

/// Main store trait.
///
/// Every state transition is a single conditional statement; the boolean
/// results report whether the guarded row was actually changed.
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Attendance

    /// Create or overwrite the row for the record's key.
    /// Returns true when the row was created.
    fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<bool>;

    fn get_attendance(
        &self,
        student_id: &UserId,
        subject_id: &SubjectId,
        date: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>>;

    // Venues

    /// Insert a free venue. Returns false if the id is already taken.
    fn insert_venue(&self, id: &VenueId, name: &str, capacity: u32) -> StoreResult<bool>;

    fn get_venue(&self, id: &VenueId) -> StoreResult<Option<VenueRecord>>;

    fn list_venues(&self) -> StoreResult<Vec<VenueRecord>>;

    /// Book the venue if it is free or its booking lapsed before `now`
    fn try_book(
        &self,
        id: &VenueId,
        holder: &UserId,
        expiry: DateTime<Local>,
        now: DateTime<Local>,
    ) -> StoreResult<bool>;

    /// Free the venue if `holder` currently holds it
    fn release_if_holder(&self, id: &VenueId, holder: &UserId) -> StoreResult<bool>;

    /// Booked venues whose expiry is strictly before `now`
    fn list_expired_bookings(&self, now: DateTime<Local>) -> StoreResult<Vec<ExpiredBooking>>;

    /// Free the venue if its booking still carries `expected_expiry_millis`
    fn force_release(&self, id: &VenueId, expected_expiry_millis: i64) -> StoreResult<bool>;

    // Permission requests

    fn insert_permission(&self, request: &PermissionRequest) -> StoreResult<()>;

    fn get_permission(&self, id: &PermissionId) -> StoreResult<Option<PermissionRequest>>;

    /// Move a pending request to `status`. Returns false if it was not pending.
    fn review_permission(
        &self,
        id: &PermissionId,
        status: PermissionStatus,
        reviewer: &UserId,
        reviewed_at: DateTime<Local>,
    ) -> StoreResult<bool>;

    /// List requests, oldest first, optionally filtered by status and student
    fn list_permissions(
        &self,
        status: Option<PermissionStatus>,
        student_id: Option<&UserId>,
    ) -> StoreResult<Vec<PermissionRequest>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Venue row as stored, before lazy expiry is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueRecord {
    pub id: VenueId,
    pub name: String,
    pub capacity: u32,
    pub state: BookingState,
    pub booked_by: Option<UserId>,
    pub booking_expiry: Option<DateTime<Local>>,
}

impl VenueRecord {
    pub fn is_booked(&self) -> bool {
        self.state == BookingState::Booked
    }
}

/// Lapsed booking as listed for the sweep.
///
/// The expiry stays in its stored form so a row whose timestamp cannot be
/// decoded is still listed, reported and matched on release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredBooking {
    pub id: VenueId,
    pub holder: Option<UserId>,
    pub expiry_millis: i64,
}
