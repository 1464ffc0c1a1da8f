//! Command dispatch: one request in, one response and any resulting events out

use chrono::{DateTime, Local};
use rollcall_api::{
    AuditEntry, Caller, ClientRole, Command, ErrorCode, ErrorInfo, EventPayload, HealthStatus,
    Request, Response, ResponsePayload, API_VERSION,
};
use rollcall_config::load_config;
use rollcall_core::{CoreEngine, CoreEvent, Outcome};
use rollcall_util::{ClientId, RollcallError};
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything the dispatcher needs to know about where a request came from
pub struct RequestContext<'a> {
    pub client_id: &'a ClientId,
    pub role: ClientRole,
    pub config_path: &'a Path,
    pub now: DateTime<Local>,
}

/// Response plus the events to broadcast
pub struct Dispatched {
    pub response: Response,
    pub events: Vec<CoreEvent>,
}

impl Dispatched {
    fn fail(request_id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            response: Response::error(request_id, ErrorInfo::new(code, message)),
            events: Vec::new(),
        }
    }
}

pub fn handle_command(engine: &mut CoreEngine, ctx: &RequestContext<'_>, request: Request) -> Dispatched {
    let request_id = request.request_id;

    if request.api_version != API_VERSION {
        return Dispatched::fail(
            request_id,
            ErrorCode::InvalidRequest,
            format!(
                "Unsupported API version {} (expected {})",
                request.api_version, API_VERSION
            ),
        );
    }

    if request.command.requires_operator() && !ctx.role.can_run_maintenance() {
        warn!(client_id = %ctx.client_id, command = ?request.command, "Operator command refused");
        return Dispatched::fail(
            request_id,
            ErrorCode::PermissionDenied,
            "This command requires an operator connection",
        );
    }

    if request.command.requires_caller() && request.caller.is_none() {
        return Dispatched::fail(
            request_id,
            ErrorCode::InvalidRequest,
            "This command must name the caller it acts for",
        );
    }

    match execute(engine, ctx, request.caller.as_ref(), request.command) {
        Ok(outcome) => Dispatched {
            response: Response::success(request_id, outcome.value),
            events: outcome.events,
        },
        Err(e) => {
            debug!(request_id, error = %e, "Request failed");
            Dispatched {
                response: Response::error(request_id, error_info(&e)),
                events: Vec::new(),
            }
        }
    }
}

fn execute(
    engine: &mut CoreEngine,
    ctx: &RequestContext<'_>,
    caller: Option<&Caller>,
    command: Command,
) -> Result<Outcome<ResponsePayload>, RollcallError> {
    let now = ctx.now;

    let payload = match command {
        Command::Ping => ResponsePayload::Pong,

        Command::GetHealth => ResponsePayload::Health(HealthStatus {
            live: true,
            ready: true,
            policy_loaded: true,
            store_ok: engine.is_store_healthy(),
        }),

        Command::GetState => ResponsePayload::State(engine.state_snapshot(now)?),

        // Subscription flags are tracked by the IPC layer
        Command::SubscribeEvents => ResponsePayload::Subscribed {
            client_id: ctx.client_id.clone(),
        },

        Command::UnsubscribeEvents => ResponsePayload::Unsubscribed,

        Command::CheckIn { payload } => {
            let outcome = engine.check_in(require_caller(caller)?, &payload, now)?;
            return Ok(map(outcome, ResponsePayload::CheckedIn));
        }

        Command::RegisterAttendance {
            student_id,
            subject_id,
            date,
            status,
        } => {
            let outcome = engine.register_attendance(
                require_caller(caller)?,
                &student_id,
                &subject_id,
                date,
                status,
                now,
            )?;
            return Ok(map(outcome, |(record, created)| {
                ResponsePayload::AttendanceRegistered { record, created }
            }));
        }

        Command::GetAttendance {
            student_id,
            subject_id,
            date,
        } => ResponsePayload::Attendance {
            record: engine.attendance_for(require_caller(caller)?, &student_id, &subject_id, date)?,
        },

        Command::IssueCheckInToken {
            subject_code,
            venue_id,
        } => ResponsePayload::CheckInToken(engine.issue_check_in_token(
            require_caller(caller)?,
            &subject_code,
            venue_id.as_ref(),
            now,
        )?),

        Command::ListVenues => ResponsePayload::Venues {
            venues: engine.list_venues(now)?,
        },

        Command::GetVenue { venue_id } => ResponsePayload::Venue(engine.venue(&venue_id, now)?),

        Command::AddVenue {
            venue_id,
            name,
            capacity,
        } => ResponsePayload::VenueAdded(engine.add_venue(
            require_caller(caller)?,
            &venue_id,
            &name,
            capacity,
            now,
        )?),

        Command::BookVenue {
            venue_id,
            duration_minutes,
        } => {
            let outcome = engine.book(require_caller(caller)?, &venue_id, duration_minutes, now)?;
            return Ok(map(outcome, ResponsePayload::VenueBooked));
        }

        Command::ReleaseVenue { venue_id } => {
            let outcome = engine.release(require_caller(caller)?, &venue_id, now)?;
            return Ok(map(outcome, ResponsePayload::VenueReleased));
        }

        Command::SubmitPermission {
            subject_id,
            reason,
            attachment,
        } => {
            let outcome = engine.submit_permission(
                require_caller(caller)?,
                &subject_id,
                &reason,
                attachment,
                now,
            )?;
            return Ok(map(outcome, ResponsePayload::PermissionSubmitted));
        }

        Command::ReviewPermission {
            permission_id,
            approve,
        } => {
            let outcome =
                engine.review_permission(require_caller(caller)?, &permission_id, approve, now)?;
            return Ok(map(outcome, ResponsePayload::PermissionReviewed));
        }

        Command::ListPermissions { status } => ResponsePayload::Permissions {
            permissions: engine.list_permissions(require_caller(caller)?, status)?,
        },

        Command::SweepExpired => {
            let outcome = engine.sweep_expired(now)?;
            return Ok(map(outcome, ResponsePayload::Swept));
        }

        Command::ReloadConfig => {
            let policy = load_config(ctx.config_path).map_err(|e| {
                engine.note_reload_failed(&e.to_string());
                RollcallError::config(e.to_string())
            })?;
            let venue_count = policy.venues.len();
            let event = engine.reload_policy(policy)?;
            info!(config_path = %ctx.config_path.display(), venue_count, "Configuration reloaded");
            return Ok(Outcome::with_event(
                ResponsePayload::ConfigReloaded { venue_count },
                event,
            ));
        }

        Command::GetAuditLog { limit } => {
            let entries = engine
                .recent_audits(limit)?
                .into_iter()
                .map(|audit| {
                    Ok(AuditEntry {
                        id: audit.id,
                        timestamp: audit.timestamp,
                        event: serde_json::to_value(&audit.event)
                            .map_err(|e| RollcallError::internal(e.to_string()))?,
                    })
                })
                .collect::<Result<Vec<_>, RollcallError>>()?;
            ResponsePayload::AuditLog { entries }
        }
    };

    Ok(Outcome::quiet(payload))
}

fn map<T>(outcome: Outcome<T>, f: impl FnOnce(T) -> ResponsePayload) -> Outcome<ResponsePayload> {
    Outcome {
        value: f(outcome.value),
        events: outcome.events,
    }
}

fn require_caller(caller: Option<&Caller>) -> Result<&Caller, RollcallError> {
    caller.ok_or_else(|| RollcallError::invalid_input("request has no caller"))
}

/// Wire error for a core error
pub fn error_info(e: &RollcallError) -> ErrorInfo {
    let code = match e {
        RollcallError::AlreadyBooked { .. } => ErrorCode::AlreadyBooked,
        RollcallError::NotAuthorized(_) => ErrorCode::NotAuthorized,
        RollcallError::NotFound(_) => ErrorCode::NotFound,
        RollcallError::InvalidInput(_) => ErrorCode::InvalidInput,
        RollcallError::Store(_) => ErrorCode::StoreError,
        RollcallError::Config(_) => ErrorCode::ConfigError,
        RollcallError::Internal(_) => ErrorCode::InternalError,
    };
    ErrorInfo::new(code, e.to_string())
}

/// Wire event for a core event
pub fn event_payload(event: CoreEvent) -> EventPayload {
    match event {
        CoreEvent::AttendanceRecorded { record } => EventPayload::AttendanceRecorded { record },
        CoreEvent::VenueBooked {
            venue_id,
            booked_by,
            until,
        } => EventPayload::VenueBooked {
            venue_id,
            booked_by,
            until,
        },
        CoreEvent::VenueReleased {
            venue_id,
            released_by,
        } => EventPayload::VenueReleased {
            venue_id,
            released_by,
        },
        CoreEvent::BookingsExpired { venue_ids } => EventPayload::BookingsExpired { venue_ids },
        CoreEvent::PermissionSubmitted {
            permission_id,
            student_id,
            subject_id,
        } => EventPayload::PermissionSubmitted {
            permission_id,
            student_id,
            subject_id,
        },
        CoreEvent::PermissionReviewed {
            permission_id,
            student_id,
            status,
        } => EventPayload::PermissionReviewed {
            permission_id,
            student_id,
            status,
        },
        CoreEvent::PolicyReloaded { venue_count } => EventPayload::PolicyReloaded { venue_count },
    }
}
