//! Command types for the rollcalld protocol

use chrono::{DateTime, Local, NaiveDate};
use rollcall_util::{ClientId, PermissionId, SubjectId, UserId, VenueId};
use serde::{Deserialize, Serialize};

use crate::{
    Attachment, AttendanceRecord, AttendanceStatus, Caller, CheckInPayload, CheckInReceipt,
    ClientRole, HealthStatus, PermissionRequest, PermissionStatus, ServiceStateSnapshot,
    SweepReport, VenueView, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Identity the request is made on behalf of. Required by every
    /// command that acts for a student, teacher or admin.
    #[serde(default)]
    pub caller: Option<Caller>,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            caller: None,
            command,
        }
    }

    pub fn with_caller(mut self, caller: Caller) -> Self {
        self.caller = Some(caller);
        self
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed request or missing caller
    InvalidRequest,
    InvalidInput,
    NotFound,
    AlreadyBooked,
    NotAuthorized,
    /// Connection role may not issue this command
    PermissionDenied,
    ConfigError,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Ping for keepalive
    Ping,

    /// Get health status
    GetHealth,

    /// Get a summary of the service state
    GetState,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Unsubscribe from events
    UnsubscribeEvents,

    // Attendance
    /// Student scanned a class QR code
    CheckIn { payload: CheckInPayload },

    /// Teacher records a status by hand
    RegisterAttendance {
        student_id: UserId,
        subject_id: SubjectId,
        date: NaiveDate,
        status: AttendanceStatus,
    },

    /// Look up one attendance row
    GetAttendance {
        student_id: UserId,
        subject_id: SubjectId,
        date: NaiveDate,
    },

    /// Teacher asks for the data to encode in a class QR code
    IssueCheckInToken {
        subject_code: SubjectId,
        #[serde(default)]
        venue_id: Option<VenueId>,
    },

    // Venues
    ListVenues,

    GetVenue { venue_id: VenueId },

    /// Admin adds a venue
    AddVenue {
        venue_id: VenueId,
        name: String,
        capacity: u32,
    },

    /// Book a venue. Uses the configured default duration when omitted.
    BookVenue {
        venue_id: VenueId,
        #[serde(default)]
        duration_minutes: Option<u64>,
    },

    /// Release a venue early (holder only)
    ReleaseVenue { venue_id: VenueId },

    // Permission requests
    SubmitPermission {
        subject_id: SubjectId,
        reason: String,
        #[serde(default)]
        attachment: Option<Attachment>,
    },

    ReviewPermission {
        permission_id: PermissionId,
        approve: bool,
    },

    ListPermissions {
        #[serde(default)]
        status: Option<PermissionStatus>,
    },

    // Operator commands
    /// Free every lapsed booking now
    SweepExpired,

    /// Reload configuration from disk
    ReloadConfig,

    /// Most recent audit log entries
    GetAuditLog { limit: usize },
}

impl Command {
    /// Commands reserved for operator connections
    pub fn requires_operator(&self) -> bool {
        matches!(
            self,
            Command::SweepExpired | Command::ReloadConfig | Command::GetAuditLog { .. }
        )
    }

    /// Commands that act on behalf of a student, teacher or admin
    pub fn requires_caller(&self) -> bool {
        matches!(
            self,
            Command::CheckIn { .. }
                | Command::RegisterAttendance { .. }
                | Command::GetAttendance { .. }
                | Command::IssueCheckInToken { .. }
                | Command::AddVenue { .. }
                | Command::BookVenue { .. }
                | Command::ReleaseVenue { .. }
                | Command::SubmitPermission { .. }
                | Command::ReviewPermission { .. }
                | Command::ListPermissions { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Pong,
    Health(HealthStatus),
    State(ServiceStateSnapshot),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    CheckedIn(CheckInReceipt),
    AttendanceRegistered { record: AttendanceRecord, created: bool },
    Attendance { record: Option<AttendanceRecord> },
    CheckInToken(CheckInPayload),
    Venues { venues: Vec<VenueView> },
    Venue(VenueView),
    VenueAdded(VenueView),
    VenueBooked(VenueView),
    VenueReleased(VenueView),
    PermissionSubmitted(PermissionRequest),
    PermissionReviewed(PermissionRequest),
    Permissions { permissions: Vec<PermissionRequest> },
    Swept(SweepReport),
    ConfigReloaded { venue_count: usize },
    AuditLog { entries: Vec<AuditEntry> },
}

/// One audit log row as exposed on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: DateTime<Local>,
    pub event: serde_json::Value,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_caller() {
        let req = Request::new(
            7,
            Command::BookVenue {
                venue_id: VenueId::new("hall-a"),
                duration_minutes: None,
            },
        )
        .with_caller(Caller::teacher("t1"));

        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 7);
        assert_eq!(parsed.caller, Some(Caller::teacher("t1")));
        assert!(matches!(
            parsed.command,
            Command::BookVenue { duration_minutes: None, .. }
        ));
    }

    #[test]
    fn request_without_caller_parses() {
        let json = r#"{"request_id":1,"api_version":1,"command":{"type":"ping"}}"#;
        let parsed: Request = serde_json::from_str(json).unwrap();
        assert!(parsed.caller.is_none());
        assert!(matches!(parsed.command, Command::Ping));
    }

    #[test]
    fn operator_commands() {
        assert!(Command::SweepExpired.requires_operator());
        assert!(Command::GetAuditLog { limit: 10 }.requires_operator());
        assert!(!Command::ListVenues.requires_operator());

        assert!(Command::ReleaseVenue { venue_id: VenueId::new("hall-a") }.requires_caller());
        assert!(!Command::ListVenues.requires_caller());
    }

    #[test]
    fn error_response_serialization() {
        let resp = Response::error(3, ErrorInfo::new(ErrorCode::AlreadyBooked, "taken"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("already_booked"));

        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed.result,
            ResponseResult::Err(ErrorInfo { code: ErrorCode::AlreadyBooked, .. })
        ));
    }
}
