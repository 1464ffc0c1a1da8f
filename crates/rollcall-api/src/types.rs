//! Shared types for the rollcalld API

use chrono::{DateTime, Local, NaiveDate};
use rollcall_util::{PermissionId, SubjectId, UserId, VenueId};
use serde::{Deserialize, Serialize};

/// Role of the person a request is made on behalf of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn can_check_in(&self) -> bool {
        matches!(self, Role::Student)
    }

    pub fn can_issue_tokens(&self) -> bool {
        matches!(self, Role::Teacher)
    }

    pub fn can_register_attendance(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }

    pub fn can_book_venues(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }

    pub fn can_manage_venues(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn can_request_permission(&self) -> bool {
        matches!(self, Role::Student)
    }

    pub fn can_review_permissions(&self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }
}

/// Authenticated identity of the caller, supplied by the request layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: impl Into<UserId>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn student(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id, Role::Student)
    }

    pub fn teacher(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id, Role::Teacher)
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self::new(user_id, Role::Admin)
    }
}

/// Outcome of an attendance check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

/// One attendance row, unique per (student, subject, date)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: UserId,
    pub subject_id: SubjectId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    /// Time of the last write to this row
    pub recorded_at: DateTime<Local>,
}

/// Data carried by a class QR code.
///
/// `date` and `time` are the generation instant in the service's local
/// time zone. `expiry_time` is advisory only and never decides the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInPayload {
    pub subject_code: SubjectId,
    #[serde(default)]
    pub venue_id: Option<VenueId>,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub expiry_time: Option<String>,
}

/// Result of a QR check-in, with the timestamps the decision used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInReceipt {
    pub record: AttendanceRecord,
    pub claimed_at: DateTime<Local>,
    pub observed_at: DateTime<Local>,
    /// observed - claimed, in milliseconds (negative under clock skew)
    pub delta_ms: i64,
    /// Whether this check-in created the row rather than overwriting it
    pub created: bool,
}

/// Booking state of a venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingState {
    Free,
    Booked,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Free => "free",
            BookingState::Booked => "booked",
        }
    }
}

/// Venue as seen by clients. Lapsed bookings are already shown as free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueView {
    pub venue_id: VenueId,
    pub name: String,
    pub capacity: u32,
    pub state: BookingState,
    pub booked_by: Option<UserId>,
    pub booking_expiry: Option<DateTime<Local>>,
}

/// Venue that could not be released during a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub venue_id: VenueId,
    pub error: String,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub released: Vec<VenueId>,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.released.is_empty() && self.failed.is_empty()
    }
}

/// Review state of a leave/permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Pending,
    Approved,
    Rejected,
}

impl PermissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionStatus::Pending => "pending",
            PermissionStatus::Approved => "approved",
            PermissionStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PermissionStatus::Pending),
            "approved" => Some(PermissionStatus::Approved),
            "rejected" => Some(PermissionStatus::Rejected),
            _ => None,
        }
    }
}

/// Supporting document attached to a permission request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A student's request to be excused from a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: PermissionId,
    pub student_id: UserId,
    pub subject_id: SubjectId,
    pub reason: String,
    pub attachment: Option<Attachment>,
    pub status: PermissionStatus,
    pub created_at: DateTime<Local>,
    pub reviewed_by: Option<UserId>,
    pub reviewed_at: Option<DateTime<Local>>,
}

/// Role of an IPC connection, derived from socket peer credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Local operator (root or the daemon's own user)
    Operator,
    /// Request layer acting on behalf of end users
    Gateway,
}

impl ClientRole {
    pub fn can_run_maintenance(&self) -> bool {
        matches!(self, ClientRole::Operator)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub policy_loaded: bool,
    pub store_ok: bool,
}

/// Summary of the service state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStateSnapshot {
    pub api_version: u32,
    pub venue_count: usize,
    pub booked_count: usize,
    pub pending_permissions: usize,
    pub tolerance_minutes: u64,
    pub sweep_interval_seconds: u64,
}
