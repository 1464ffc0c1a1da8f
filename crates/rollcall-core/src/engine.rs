//! Core policy engine

use chrono::{DateTime, Local, NaiveDate};
use rollcall_api::{
    Attachment, AttendanceRecord, AttendanceStatus, BookingState, Caller, CheckInPayload,
    CheckInReceipt, PermissionRequest, PermissionStatus, ServiceStateSnapshot, SweepFailure,
    SweepReport, VenueView, API_VERSION,
};
use rollcall_config::Policy;
use rollcall_store::{AuditEvent, AuditEventType, ExpiredBooking, Store, VenueRecord};
use rollcall_util::{
    from_epoch_millis, PermissionId, Result, RollcallError, SubjectId, UserId, VenueId,
    PAYLOAD_DATE_FORMAT, PAYLOAD_TIME_FORMAT,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{evaluate, parse_claimed_at, view_at, CoreEvent, Outcome};

/// The core policy engine
pub struct CoreEngine {
    policy: Policy,
    store: Arc<dyn Store>,
}

impl CoreEngine {
    /// Create a new core engine
    pub fn new(policy: Policy, store: Arc<dyn Store>) -> Self {
        info!(
            venue_count = policy.venues.len(),
            tolerance_minutes = policy.attendance.tolerance_minutes,
            "Core engine initialized"
        );

        let _ = store.append_audit(AuditEvent::new(AuditEventType::PolicyLoaded {
            venue_count: policy.venues.len(),
        }));

        Self { policy, store }
    }

    /// Get current policy
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Create configured venues that are not in the store yet.
    /// Returns how many were created.
    pub fn seed_venues(&self) -> Result<usize> {
        seed_venues_from(self.store.as_ref(), &self.policy)
    }

    /// Reload policy and seed any venues it adds.
    ///
    /// The new policy only takes effect once its venues are in the store; on
    /// failure the current policy stays in force and the failure is audited.
    pub fn reload_policy(&mut self, policy: Policy) -> Result<CoreEvent> {
        let venue_count = policy.venues.len();
        if let Err(e) = seed_venues_from(self.store.as_ref(), &policy) {
            self.note_reload_failed(&e.to_string());
            return Err(e);
        }
        self.policy = policy;

        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ConfigReloaded { success: true }));

        info!(venue_count, "Policy reloaded");

        Ok(CoreEvent::PolicyReloaded { venue_count })
    }

    /// Record a reload that never reached the engine
    pub fn note_reload_failed(&self, error: &str) {
        warn!(error, "Configuration reload failed, keeping current policy");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ConfigReloaded { success: false }));
    }

    // Attendance

    /// Classify a QR scan and record the student's attendance for the day
    pub fn check_in(
        &self,
        caller: &Caller,
        payload: &CheckInPayload,
        observed_at: DateTime<Local>,
    ) -> Result<Outcome<CheckInReceipt>> {
        if !caller.role.can_check_in() {
            return Err(RollcallError::not_authorized("only students can check in"));
        }
        require_id(caller.user_id.is_blank(), "student id")?;

        let (date, claimed_at) = parse_claimed_at(payload)?;
        if let Some(venue_id) = &payload.venue_id {
            self.require_venue(venue_id)?;
        }

        let verdict = evaluate(claimed_at, observed_at, self.policy.attendance.tolerance());

        let record = AttendanceRecord {
            student_id: caller.user_id.clone(),
            subject_id: payload.subject_code.clone(),
            date,
            status: verdict.status,
            recorded_at: observed_at,
        };
        let created = self.store.upsert_attendance(&record)?;

        let _ = self.store.append_audit(AuditEvent::at(
            observed_at,
            AuditEventType::CheckInEvaluated {
                student_id: record.student_id.clone(),
                subject_id: record.subject_id.clone(),
                claimed_at,
                observed_at,
                delta_ms: verdict.delta_ms(),
                status: verdict.status,
            },
        ));

        info!(
            student_id = %record.student_id,
            subject_id = %record.subject_id,
            date = %date,
            delta_ms = verdict.delta_ms(),
            status = verdict.status.as_str(),
            created,
            "Check-in evaluated"
        );

        let receipt = CheckInReceipt {
            record: record.clone(),
            claimed_at,
            observed_at,
            delta_ms: verdict.delta_ms(),
            created,
        };

        Ok(Outcome::with_event(
            receipt,
            CoreEvent::AttendanceRecorded { record },
        ))
    }

    /// Record a status by hand. Returns the record and whether it was created.
    pub fn register_attendance(
        &self,
        caller: &Caller,
        student_id: &UserId,
        subject_id: &SubjectId,
        date: NaiveDate,
        status: AttendanceStatus,
        now: DateTime<Local>,
    ) -> Result<Outcome<(AttendanceRecord, bool)>> {
        if !caller.role.can_register_attendance() {
            return Err(RollcallError::not_authorized(
                "only teachers and admins can register attendance",
            ));
        }
        require_id(student_id.is_blank(), "student id")?;
        require_id(subject_id.is_blank(), "subject id")?;

        let record = AttendanceRecord {
            student_id: student_id.clone(),
            subject_id: subject_id.clone(),
            date,
            status,
            recorded_at: now,
        };
        let created = self.store.upsert_attendance(&record)?;

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::AttendanceRegistered {
                student_id: student_id.clone(),
                subject_id: subject_id.clone(),
                date,
                status,
                registered_by: caller.user_id.clone(),
                created,
            },
        ));

        info!(
            student_id = %student_id,
            subject_id = %subject_id,
            date = %date,
            status = status.as_str(),
            registered_by = %caller.user_id,
            "Attendance registered"
        );

        Ok(Outcome::with_event(
            (record.clone(), created),
            CoreEvent::AttendanceRecorded { record },
        ))
    }

    /// Look up one attendance row. Students may only read their own.
    pub fn attendance_for(
        &self,
        caller: &Caller,
        student_id: &UserId,
        subject_id: &SubjectId,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        if caller.role.can_check_in() && &caller.user_id != student_id {
            return Err(RollcallError::not_authorized(
                "students can only read their own attendance",
            ));
        }

        Ok(self.store.get_attendance(student_id, subject_id, date)?)
    }

    /// Data for a class QR code generated now
    pub fn issue_check_in_token(
        &self,
        caller: &Caller,
        subject_code: &SubjectId,
        venue_id: Option<&VenueId>,
        now: DateTime<Local>,
    ) -> Result<CheckInPayload> {
        if !caller.role.can_issue_tokens() {
            return Err(RollcallError::not_authorized(
                "only teachers can generate check-in codes",
            ));
        }
        require_id(subject_code.is_blank(), "subject code")?;
        if let Some(venue_id) = venue_id {
            self.require_venue(venue_id)?;
        }

        let expiry = now + self.policy.attendance.qr_validity();
        debug!(subject_code = %subject_code, issued_by = %caller.user_id, "Check-in code issued");

        Ok(CheckInPayload {
            subject_code: subject_code.clone(),
            venue_id: venue_id.cloned(),
            date: now.format(PAYLOAD_DATE_FORMAT).to_string(),
            time: now.format(PAYLOAD_TIME_FORMAT).to_string(),
            expiry_time: Some(expiry.to_rfc3339()),
        })
    }

    // Venues

    pub fn venue(&self, venue_id: &VenueId, now: DateTime<Local>) -> Result<VenueView> {
        Ok(view_at(&self.require_venue(venue_id)?, now))
    }

    pub fn list_venues(&self, now: DateTime<Local>) -> Result<Vec<VenueView>> {
        Ok(self
            .store
            .list_venues()?
            .iter()
            .map(|record| view_at(record, now))
            .collect())
    }

    pub fn add_venue(
        &self,
        caller: &Caller,
        venue_id: &VenueId,
        name: &str,
        capacity: u32,
        now: DateTime<Local>,
    ) -> Result<VenueView> {
        if !caller.role.can_manage_venues() {
            return Err(RollcallError::not_authorized("only admins can add venues"));
        }
        require_id(venue_id.is_blank(), "venue id")?;
        if name.trim().is_empty() {
            return Err(RollcallError::invalid_input("venue name is empty"));
        }
        if capacity == 0 {
            return Err(RollcallError::invalid_input("venue capacity must be positive"));
        }

        if !self.store.insert_venue(venue_id, name.trim(), capacity)? {
            return Err(RollcallError::invalid_input(format!(
                "venue {} already exists",
                venue_id
            )));
        }

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::VenueAdded {
                venue_id: venue_id.clone(),
                added_by: caller.user_id.clone(),
            },
        ));
        info!(venue_id = %venue_id, capacity, added_by = %caller.user_id, "Venue added");

        self.venue(venue_id, now)
    }

    /// Book a venue for `duration_minutes` (or the configured default)
    pub fn book(
        &self,
        caller: &Caller,
        venue_id: &VenueId,
        duration_minutes: Option<u64>,
        now: DateTime<Local>,
    ) -> Result<Outcome<VenueView>> {
        if !caller.role.can_book_venues() {
            return Err(RollcallError::not_authorized(
                "only teachers and admins can book venues",
            ));
        }
        let duration = self
            .policy
            .booking
            .resolve_duration(duration_minutes)
            .ok_or_else(|| {
                RollcallError::invalid_input(format!(
                    "booking duration must be between 1 and {} minutes",
                    self.policy.booking.max_duration_minutes
                ))
            })?;
        self.require_venue(venue_id)?;

        let until = now + duration;
        if !self.store.try_book(venue_id, &caller.user_id, until, now)? {
            if let Some(conflict) = self.booking_conflict(caller, venue_id, now)? {
                return Err(conflict);
            }

            // The booking that beat us is already gone again
            debug!(venue_id = %venue_id, "Venue freed during booking, retrying");
            if !self.store.try_book(venue_id, &caller.user_id, until, now)? {
                return Err(self.booking_conflict(caller, venue_id, now)?.unwrap_or_else(|| {
                    RollcallError::internal(format!("venue {} keeps changing state", venue_id))
                }));
            }
        }

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::VenueBooked {
                venue_id: venue_id.clone(),
                booked_by: caller.user_id.clone(),
                until,
            },
        ));
        info!(venue_id = %venue_id, booked_by = %caller.user_id, until = %until, "Venue booked");

        Ok(Outcome::with_event(
            self.venue(venue_id, now)?,
            CoreEvent::VenueBooked {
                venue_id: venue_id.clone(),
                booked_by: caller.user_id.clone(),
                until,
            },
        ))
    }

    /// The live booking that blocks `caller`, if there is one
    fn booking_conflict(
        &self,
        caller: &Caller,
        venue_id: &VenueId,
        now: DateTime<Local>,
    ) -> Result<Option<RollcallError>> {
        let record = self.require_venue(venue_id)?;

        match (record.booked_by, record.booking_expiry) {
            (Some(holder), Some(until)) if record.state == BookingState::Booked && until >= now => {
                let _ = self.store.append_audit(AuditEvent::at(
                    now,
                    AuditEventType::BookingRejected {
                        venue_id: venue_id.clone(),
                        requested_by: caller.user_id.clone(),
                        holder: holder.clone(),
                    },
                ));
                debug!(venue_id = %venue_id, holder = %holder, "Booking rejected");

                Ok(Some(RollcallError::AlreadyBooked {
                    venue_id: venue_id.clone(),
                    holder,
                    until,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Free a venue before its expiry. Only the holder may do this.
    pub fn release(
        &self,
        caller: &Caller,
        venue_id: &VenueId,
        now: DateTime<Local>,
    ) -> Result<Outcome<VenueView>> {
        self.require_venue(venue_id)?;

        if !self.store.release_if_holder(venue_id, &caller.user_id)? {
            debug!(venue_id = %venue_id, caller = %caller.user_id, "Release refused");
            return Err(RollcallError::not_authorized(format!(
                "{} does not hold venue {}",
                caller.user_id, venue_id
            )));
        }

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::VenueReleased {
                venue_id: venue_id.clone(),
                released_by: caller.user_id.clone(),
            },
        ));
        info!(venue_id = %venue_id, released_by = %caller.user_id, "Venue released");

        Ok(Outcome::with_event(
            self.venue(venue_id, now)?,
            CoreEvent::VenueReleased {
                venue_id: venue_id.clone(),
                released_by: caller.user_id.clone(),
            },
        ))
    }

    /// Free every booking whose expiry is before `now`.
    ///
    /// A venue that fails to release is reported in the result and does not
    /// stop the others. Running it twice in a row makes no further changes.
    pub fn sweep_expired(&self, now: DateTime<Local>) -> Result<Outcome<SweepReport>> {
        let expired = self.store.list_expired_bookings(now)?;
        let mut report = SweepReport::default();

        for booking in expired {
            match self.release_lapsed(&booking) {
                Ok(Some(expiry)) => {
                    let holder = booking.holder.clone().unwrap_or_else(|| UserId::new(""));
                    let _ = self.store.append_audit(AuditEvent::at(
                        now,
                        AuditEventType::BookingExpired {
                            venue_id: booking.id.clone(),
                            holder: holder.clone(),
                            expired_at: expiry,
                        },
                    ));
                    info!(venue_id = %booking.id, holder = %holder, expired_at = %expiry, "Booking expired");
                    report.released.push(booking.id);
                }
                Ok(None) => {
                    debug!(venue_id = %booking.id, "Booking changed before sweep, skipped");
                }
                Err(e) => {
                    warn!(venue_id = %booking.id, error = %e, "Failed to release lapsed booking");
                    let _ = self.store.append_audit(AuditEvent::at(
                        now,
                        AuditEventType::SweepFailed {
                            venue_id: booking.id.clone(),
                            error: e.to_string(),
                        },
                    ));
                    report.failed.push(SweepFailure {
                        venue_id: booking.id,
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.released.is_empty() {
            return Ok(Outcome::quiet(report));
        }

        let event = CoreEvent::BookingsExpired {
            venue_ids: report.released.clone(),
        };
        Ok(Outcome::with_event(report, event))
    }

    /// Free one lapsed booking. Returns its expiry, or None if it changed
    /// since it was listed.
    fn release_lapsed(&self, booking: &ExpiredBooking) -> Result<Option<DateTime<Local>>> {
        let expiry = from_epoch_millis(booking.expiry_millis).ok_or_else(|| {
            RollcallError::store(format!(
                "booking expiry out of range: {}",
                booking.expiry_millis
            ))
        })?;

        if self.store.force_release(&booking.id, booking.expiry_millis)? {
            Ok(Some(expiry))
        } else {
            Ok(None)
        }
    }

    // Permission requests

    pub fn submit_permission(
        &self,
        caller: &Caller,
        subject_id: &SubjectId,
        reason: &str,
        attachment: Option<Attachment>,
        now: DateTime<Local>,
    ) -> Result<Outcome<PermissionRequest>> {
        if !caller.role.can_request_permission() {
            return Err(RollcallError::not_authorized(
                "only students can request permission",
            ));
        }
        require_id(subject_id.is_blank(), "subject id")?;
        if reason.trim().is_empty() {
            return Err(RollcallError::invalid_input("reason is empty"));
        }
        if let Some(attachment) = &attachment {
            let limit = self.policy.permissions.max_attachment_bytes;
            if attachment.data.len() > limit {
                return Err(RollcallError::invalid_input(format!(
                    "attachment is {} bytes, limit is {}",
                    attachment.data.len(),
                    limit
                )));
            }
        }

        let request = PermissionRequest {
            id: PermissionId::new(),
            student_id: caller.user_id.clone(),
            subject_id: subject_id.clone(),
            reason: reason.trim().to_string(),
            attachment,
            status: PermissionStatus::Pending,
            created_at: now,
            reviewed_by: None,
            reviewed_at: None,
        };
        self.store.insert_permission(&request)?;

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::PermissionSubmitted {
                permission_id: request.id,
                student_id: request.student_id.clone(),
                subject_id: request.subject_id.clone(),
            },
        ));
        info!(
            permission_id = %request.id,
            student_id = %request.student_id,
            subject_id = %request.subject_id,
            "Permission requested"
        );

        let event = CoreEvent::PermissionSubmitted {
            permission_id: request.id,
            student_id: request.student_id.clone(),
            subject_id: request.subject_id.clone(),
        };
        Ok(Outcome::with_event(request, event))
    }

    pub fn review_permission(
        &self,
        caller: &Caller,
        permission_id: &PermissionId,
        approve: bool,
        now: DateTime<Local>,
    ) -> Result<Outcome<PermissionRequest>> {
        if !caller.role.can_review_permissions() {
            return Err(RollcallError::not_authorized(
                "only teachers and admins can review permission requests",
            ));
        }
        if self.store.get_permission(permission_id)?.is_none() {
            return Err(RollcallError::not_found(format!(
                "permission request {}",
                permission_id
            )));
        }

        let status = if approve {
            PermissionStatus::Approved
        } else {
            PermissionStatus::Rejected
        };
        if !self
            .store
            .review_permission(permission_id, status, &caller.user_id, now)?
        {
            return Err(RollcallError::invalid_input(format!(
                "permission request {} was already reviewed",
                permission_id
            )));
        }

        let request = self.store.get_permission(permission_id)?.ok_or_else(|| {
            RollcallError::internal(format!("permission request {} vanished", permission_id))
        })?;

        let _ = self.store.append_audit(AuditEvent::at(
            now,
            AuditEventType::PermissionReviewed {
                permission_id: *permission_id,
                reviewed_by: caller.user_id.clone(),
                status,
            },
        ));
        info!(
            permission_id = %permission_id,
            reviewed_by = %caller.user_id,
            status = status.as_str(),
            "Permission reviewed"
        );

        let event = CoreEvent::PermissionReviewed {
            permission_id: *permission_id,
            student_id: request.student_id.clone(),
            status,
        };
        Ok(Outcome::with_event(request, event))
    }

    /// Students see their own requests; reviewers see everyone's
    pub fn list_permissions(
        &self,
        caller: &Caller,
        status: Option<PermissionStatus>,
    ) -> Result<Vec<PermissionRequest>> {
        let student_filter = if caller.role.can_review_permissions() {
            None
        } else if caller.role.can_request_permission() {
            Some(&caller.user_id)
        } else {
            return Err(RollcallError::not_authorized("cannot list permission requests"));
        };

        Ok(self.store.list_permissions(status, student_filter)?)
    }

    // Service state

    pub fn state_snapshot(&self, now: DateTime<Local>) -> Result<ServiceStateSnapshot> {
        let venues = self.list_venues(now)?;
        let pending = self
            .store
            .list_permissions(Some(PermissionStatus::Pending), None)?;

        Ok(ServiceStateSnapshot {
            api_version: API_VERSION,
            venue_count: venues.len(),
            booked_count: venues
                .iter()
                .filter(|v| v.state == BookingState::Booked)
                .count(),
            pending_permissions: pending.len(),
            tolerance_minutes: self.policy.attendance.tolerance_minutes,
            sweep_interval_seconds: self.policy.service.sweep_interval.as_secs(),
        })
    }

    pub fn recent_audits(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        Ok(self.store.get_recent_audits(limit)?)
    }

    pub fn is_store_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    fn require_venue(&self, venue_id: &VenueId) -> Result<VenueRecord> {
        self.store
            .get_venue(venue_id)?
            .ok_or_else(|| RollcallError::not_found(format!("venue {}", venue_id)))
    }
}

fn seed_venues_from(store: &dyn Store, policy: &Policy) -> Result<usize> {
    let mut created = 0;
    for seed in &policy.venues {
        if store.insert_venue(&seed.id, &seed.name, seed.capacity)? {
            info!(venue_id = %seed.id, capacity = seed.capacity, "Venue seeded from config");
            created += 1;
        }
    }
    Ok(created)
}

fn require_id(blank: bool, what: &str) -> Result<()> {
    if blank {
        Err(RollcallError::invalid_input(format!("{} is empty", what)))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rollcall_config::VenueSeed;
    use rollcall_store::{ExpiredBooking, SqliteStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn make_test_policy() -> Policy {
        Policy {
            venues: vec![
                VenueSeed {
                    id: VenueId::new("V1"),
                    name: "Lecture Hall 1".into(),
                    capacity: 120,
                },
                VenueSeed {
                    id: VenueId::new("V2"),
                    name: "Seminar Room 2".into(),
                    capacity: 20,
                },
            ],
            ..Default::default()
        }
    }

    fn make_engine() -> CoreEngine {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = CoreEngine::new(make_test_policy(), store);
        assert_eq!(engine.seed_venues().unwrap(), 2);
        engine
    }

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap()
    }

    fn class_payload(time: &str) -> CheckInPayload {
        CheckInPayload {
            subject_code: SubjectId::new("CS101"),
            venue_id: None,
            date: "2025-03-14".into(),
            time: time.into(),
            expiry_time: None,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_seed_is_idempotent() {
        let engine = make_engine();
        assert_eq!(engine.seed_venues().unwrap(), 0);
        assert_eq!(engine.list_venues(t0()).unwrap().len(), 2);
    }

    #[test]
    fn test_check_in_window_scenario() {
        let engine = make_engine();
        let payload = class_payload("09:00:00");

        let cases = [
            ("s1", at(9, 29, 59), AttendanceStatus::Present),
            ("s2", at(9, 30, 1), AttendanceStatus::Absent),
            ("s3", at(8, 59, 59), AttendanceStatus::Absent),
        ];

        for (student, observed, expected) in cases {
            let outcome = engine
                .check_in(&Caller::student(student), &payload, observed)
                .unwrap();
            assert_eq!(outcome.value.record.status, expected, "student {}", student);
            assert!(outcome.value.created);
            assert!(matches!(
                &outcome.events[..],
                [CoreEvent::AttendanceRecorded { .. }]
            ));
        }
    }

    #[test]
    fn test_check_in_upsert_keeps_latest() {
        let engine = make_engine();
        let student = Caller::student("s1");

        let first = engine
            .check_in(&student, &class_payload("09:00:00"), at(9, 5, 0))
            .unwrap();
        assert!(first.value.created);

        let second = engine
            .check_in(&student, &class_payload("09:00:00"), at(9, 45, 0))
            .unwrap();
        assert!(!second.value.created);

        let stored = engine
            .attendance_for(
                &Caller::teacher("t1"),
                &UserId::new("s1"),
                &SubjectId::new("CS101"),
                NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttendanceStatus::Absent);
        assert_eq!(stored.recorded_at, at(9, 45, 0));
    }

    #[test]
    fn test_check_in_requires_student() {
        let engine = make_engine();
        let err = engine
            .check_in(&Caller::teacher("t1"), &class_payload("09:00:00"), at(9, 1, 0))
            .unwrap_err();
        assert!(matches!(err, RollcallError::NotAuthorized(_)));
    }

    #[test]
    fn test_check_in_rejects_bad_payload() {
        let engine = make_engine();
        let err = engine
            .check_in(&Caller::student("s1"), &class_payload("nine"), at(9, 1, 0))
            .unwrap_err();
        assert!(matches!(err, RollcallError::InvalidInput(_)));

        let mut payload = class_payload("09:00:00");
        payload.venue_id = Some(VenueId::new("nowhere"));
        let err = engine
            .check_in(&Caller::student("s1"), &payload, at(9, 1, 0))
            .unwrap_err();
        assert!(matches!(err, RollcallError::NotFound(_)));
    }

    #[test]
    fn test_students_read_only_their_attendance() {
        let engine = make_engine();
        let err = engine
            .attendance_for(
                &Caller::student("s2"),
                &UserId::new("s1"),
                &SubjectId::new("CS101"),
                NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, RollcallError::NotAuthorized(_)));
    }

    #[test]
    fn test_manual_register_overwrites_check_in() {
        let engine = make_engine();
        engine
            .check_in(&Caller::student("s1"), &class_payload("09:00:00"), at(10, 0, 0))
            .unwrap();

        let outcome = engine
            .register_attendance(
                &Caller::teacher("t1"),
                &UserId::new("s1"),
                &SubjectId::new("CS101"),
                NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
                AttendanceStatus::Present,
                at(10, 5, 0),
            )
            .unwrap();

        let (record, created) = outcome.value;
        assert!(!created);
        assert_eq!(record.status, AttendanceStatus::Present);

        let err = engine
            .register_attendance(
                &Caller::student("s1"),
                &UserId::new("s1"),
                &SubjectId::new("CS101"),
                NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
                AttendanceStatus::Present,
                at(10, 6, 0),
            )
            .unwrap_err();
        assert!(matches!(err, RollcallError::NotAuthorized(_)));
    }

    #[test]
    fn test_issued_token_checks_in_present() {
        let engine = make_engine();
        let issued_at = at(9, 0, 0);

        let token = engine
            .issue_check_in_token(
                &Caller::teacher("t1"),
                &SubjectId::new("CS101"),
                Some(&VenueId::new("V1")),
                issued_at,
            )
            .unwrap();
        assert_eq!(token.date, "2025-03-14");
        assert_eq!(token.time, "09:00:00");
        let expiry = DateTime::parse_from_rfc3339(token.expiry_time.as_deref().unwrap()).unwrap();
        assert_eq!(expiry.with_timezone(&Local), issued_at + Duration::minutes(30));

        let outcome = engine
            .check_in(&Caller::student("s1"), &token, issued_at + Duration::minutes(10))
            .unwrap();
        assert_eq!(outcome.value.record.status, AttendanceStatus::Present);
        assert_eq!(outcome.value.delta_ms, 10 * 60 * 1000);
    }

    #[test]
    fn test_booking_lifecycle_scenario() {
        let engine = make_engine();
        let v1 = VenueId::new("V1");
        let t1 = Caller::teacher("T1");
        let t2 = Caller::teacher("T2");

        let booked = engine.book(&t1, &v1, Some(180), t0()).unwrap();
        assert_eq!(booked.value.state, BookingState::Booked);
        assert_eq!(booked.value.booking_expiry, Some(t0() + Duration::minutes(180)));

        let err = engine
            .book(&t2, &v1, Some(60), t0() + Duration::minutes(100))
            .unwrap_err();
        match err {
            RollcallError::AlreadyBooked { holder, until, .. } => {
                assert_eq!(holder, UserId::new("T1"));
                assert_eq!(until, t0() + Duration::minutes(180));
            }
            other => panic!("Expected AlreadyBooked, got {:?}", other),
        }

        let sweep = engine.sweep_expired(t0() + Duration::minutes(200)).unwrap();
        assert_eq!(sweep.value.released, vec![v1.clone()]);
        assert!(sweep.value.failed.is_empty());
        assert!(matches!(
            &sweep.events[..],
            [CoreEvent::BookingsExpired { venue_ids }] if venue_ids == &vec![v1.clone()]
        ));
        assert_eq!(
            engine.venue(&v1, t0() + Duration::minutes(200)).unwrap().state,
            BookingState::Free
        );

        let rebooked = engine
            .book(&t2, &v1, None, t0() + Duration::minutes(201))
            .unwrap();
        assert_eq!(rebooked.value.booked_by, Some(UserId::new("T2")));
    }

    #[test]
    fn test_lapsed_booking_free_before_sweep() {
        let engine = make_engine();
        let v1 = VenueId::new("V1");

        engine.book(&Caller::teacher("T1"), &v1, Some(180), t0()).unwrap();

        let later = t0() + Duration::minutes(201);
        assert_eq!(engine.venue(&v1, later).unwrap().state, BookingState::Free);
        let booked = engine.book(&Caller::teacher("T2"), &v1, Some(30), later).unwrap();
        assert_eq!(booked.value.booked_by, Some(UserId::new("T2")));

        // The takeover is live, so the sweep leaves it alone
        assert!(engine.sweep_expired(later).unwrap().value.is_noop());
    }

    #[test]
    fn test_second_sweep_is_noop() {
        let engine = make_engine();
        engine.book(&Caller::teacher("T1"), &VenueId::new("V1"), Some(60), t0()).unwrap();
        engine.book(&Caller::admin("A1"), &VenueId::new("V2"), Some(90), t0()).unwrap();

        let now = t0() + Duration::minutes(120);
        let first = engine.sweep_expired(now).unwrap();
        assert_eq!(first.value.released.len(), 2);

        let second = engine.sweep_expired(now).unwrap();
        assert!(second.value.is_noop());
        assert!(second.events.is_empty());
    }

    #[test]
    fn test_booking_at_expiry_instant_still_held() {
        let engine = make_engine();
        let v1 = VenueId::new("V1");
        engine.book(&Caller::teacher("T1"), &v1, Some(60), t0()).unwrap();

        let expiry = t0() + Duration::minutes(60);
        assert!(engine.sweep_expired(expiry).unwrap().value.is_noop());
        assert!(matches!(
            engine.book(&Caller::teacher("T2"), &v1, Some(60), expiry),
            Err(RollcallError::AlreadyBooked { .. })
        ));
    }

    #[test]
    fn test_release_by_non_holder_refused() {
        let engine = make_engine();
        let v1 = VenueId::new("V1");
        engine.book(&Caller::teacher("T1"), &v1, Some(60), t0()).unwrap();

        let err = engine
            .release(&Caller::teacher("T2"), &v1, t0() + Duration::minutes(5))
            .unwrap_err();
        assert!(matches!(err, RollcallError::NotAuthorized(_)));

        let view = engine.venue(&v1, t0() + Duration::minutes(5)).unwrap();
        assert_eq!(view.state, BookingState::Booked);
        assert_eq!(view.booked_by, Some(UserId::new("T1")));

        let released = engine
            .release(&Caller::teacher("T1"), &v1, t0() + Duration::minutes(6))
            .unwrap();
        assert_eq!(released.value.state, BookingState::Free);

        // Nobody holds a free venue
        assert!(matches!(
            engine.release(&Caller::teacher("T1"), &v1, t0() + Duration::minutes(7)),
            Err(RollcallError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_unknown_venue_not_found() {
        let engine = make_engine();
        let ghost = VenueId::new("ghost");

        assert!(matches!(
            engine.book(&Caller::teacher("T1"), &ghost, None, t0()),
            Err(RollcallError::NotFound(_))
        ));
        assert!(matches!(
            engine.release(&Caller::teacher("T1"), &ghost, t0()),
            Err(RollcallError::NotFound(_))
        ));
    }

    #[test]
    fn test_booking_duration_limits() {
        let engine = make_engine();
        let v1 = VenueId::new("V1");

        for minutes in [0, 24 * 60 + 1] {
            assert!(matches!(
                engine.book(&Caller::teacher("T1"), &v1, Some(minutes), t0()),
                Err(RollcallError::InvalidInput(_))
            ));
        }
        assert!(matches!(
            engine.book(&Caller::student("s1"), &v1, None, t0()),
            Err(RollcallError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_add_venue() {
        let engine = make_engine();
        let lab = VenueId::new("lab-3");

        assert!(matches!(
            engine.add_venue(&Caller::teacher("T1"), &lab, "Lab 3", 30, t0()),
            Err(RollcallError::NotAuthorized(_))
        ));

        let view = engine
            .add_venue(&Caller::admin("A1"), &lab, "Lab 3", 30, t0())
            .unwrap();
        assert_eq!(view.state, BookingState::Free);
        assert_eq!(view.capacity, 30);

        assert!(matches!(
            engine.add_venue(&Caller::admin("A1"), &lab, "Lab 3 again", 30, t0()),
            Err(RollcallError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.add_venue(&Caller::admin("A1"), &VenueId::new("x"), "X", 0, t0()),
            Err(RollcallError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_permission_review_flow() {
        let engine = make_engine();
        let student = Caller::student("s1");

        let submitted = engine
            .submit_permission(&student, &SubjectId::new("CS101"), "Family emergency", None, t0())
            .unwrap();
        let id = submitted.value.id;
        assert_eq!(submitted.value.status, PermissionStatus::Pending);

        assert!(matches!(
            engine.review_permission(&student, &id, true, t0()),
            Err(RollcallError::NotAuthorized(_))
        ));

        let reviewed = engine
            .review_permission(&Caller::teacher("T1"), &id, false, t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(reviewed.value.status, PermissionStatus::Rejected);
        assert_eq!(reviewed.value.reviewed_by, Some(UserId::new("T1")));
        assert!(matches!(
            &reviewed.events[..],
            [CoreEvent::PermissionReviewed { status: PermissionStatus::Rejected, .. }]
        ));

        assert!(matches!(
            engine.review_permission(&Caller::admin("A1"), &id, true, t0() + Duration::hours(2)),
            Err(RollcallError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.review_permission(&Caller::admin("A1"), &PermissionId::new(), true, t0()),
            Err(RollcallError::NotFound(_))
        ));
    }

    #[test]
    fn test_permission_validation_and_listing() {
        let engine = make_engine();

        assert!(matches!(
            engine.submit_permission(&Caller::student("s1"), &SubjectId::new("CS101"), "  ", None, t0()),
            Err(RollcallError::InvalidInput(_))
        ));

        let oversized = Attachment {
            content_type: "image/png".into(),
            data: vec![0; engine.policy().permissions.max_attachment_bytes + 1],
        };
        assert!(matches!(
            engine.submit_permission(
                &Caller::student("s1"),
                &SubjectId::new("CS101"),
                "Sick",
                Some(oversized),
                t0()
            ),
            Err(RollcallError::InvalidInput(_))
        ));

        engine
            .submit_permission(&Caller::student("s1"), &SubjectId::new("CS101"), "Sick", None, t0())
            .unwrap();
        engine
            .submit_permission(&Caller::student("s2"), &SubjectId::new("MA201"), "Trip", None, t0())
            .unwrap();

        assert_eq!(engine.list_permissions(&Caller::student("s1"), None).unwrap().len(), 1);
        assert_eq!(engine.list_permissions(&Caller::teacher("T1"), None).unwrap().len(), 2);
        assert_eq!(
            engine
                .list_permissions(&Caller::admin("A1"), Some(PermissionStatus::Approved))
                .unwrap()
                .len(),
            0
        );
        assert_eq!(engine.state_snapshot(t0()).unwrap().pending_permissions, 2);
    }

    #[test]
    fn test_state_snapshot_counts_live_bookings() {
        let engine = make_engine();
        engine.book(&Caller::teacher("T1"), &VenueId::new("V1"), Some(60), t0()).unwrap();

        let snapshot = engine.state_snapshot(t0() + Duration::minutes(30)).unwrap();
        assert_eq!(snapshot.venue_count, 2);
        assert_eq!(snapshot.booked_count, 1);

        let snapshot = engine.state_snapshot(t0() + Duration::minutes(61)).unwrap();
        assert_eq!(snapshot.booked_count, 0);
    }

    #[test]
    fn test_reload_seeds_new_venues() {
        let mut engine = make_engine();
        let mut policy = make_test_policy();
        policy.venues.push(VenueSeed {
            id: VenueId::new("V3"),
            name: "Auditorium".into(),
            capacity: 400,
        });

        let event = engine.reload_policy(policy).unwrap();
        assert_eq!(event, CoreEvent::PolicyReloaded { venue_count: 3 });
        assert_eq!(engine.list_venues(t0()).unwrap().len(), 3);
    }

    #[test]
    fn test_sweep_isolates_unreadable_booking() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rollcall.db");
        let store = Arc::new(SqliteStore::open(&db_path).unwrap());
        let engine = CoreEngine::new(make_test_policy(), store.clone());
        engine.seed_venues().unwrap();

        let v1 = VenueId::new("V1");
        engine.book(&Caller::teacher("T1"), &v1, Some(10), t0()).unwrap();

        let raw = rusqlite::Connection::open(&db_path).unwrap();
        raw.execute(
            "UPDATE venues SET booking_state = 'booked', booked_by = 'T2', booking_expiry = ?1 \
             WHERE id = 'V2'",
            [i64::MIN],
        )
        .unwrap();

        let swept = engine.sweep_expired(t0() + Duration::minutes(60)).unwrap();
        assert_eq!(swept.value.released, vec![v1.clone()]);
        assert_eq!(swept.value.failed.len(), 1);
        assert_eq!(swept.value.failed[0].venue_id, VenueId::new("V2"));
        assert_eq!(
            swept.events,
            vec![CoreEvent::BookingsExpired {
                venue_ids: vec![v1.clone()]
            }]
        );

        assert!(!store.get_venue(&v1).unwrap().unwrap().is_booked());
        let audits = engine.recent_audits(5).unwrap();
        assert!(audits.iter().any(|a| matches!(
            &a.event,
            AuditEventType::SweepFailed { venue_id, .. } if venue_id.as_str() == "V2"
        )));
    }

    #[test]
    fn test_failed_reload_keeps_current_policy() {
        let mut engine = make_engine();
        let mut policy = make_test_policy();
        policy.attendance.tolerance_minutes = 5;
        policy.venues.push(VenueSeed {
            id: VenueId::new("V3"),
            name: "Broken Room".into(),
            // Rejected by the venues table
            capacity: 0,
        });

        let err = engine.reload_policy(policy).unwrap_err();
        assert!(matches!(err, RollcallError::Store(_)));
        assert_eq!(engine.policy().attendance.tolerance_minutes, 30);
        assert_eq!(engine.policy().venues.len(), 2);

        let audits = engine.recent_audits(1).unwrap();
        assert!(matches!(
            audits[0].event,
            AuditEventType::ConfigReloaded { success: false }
        ));
    }

    /// SQLite store whose next `try_book` reports a lost race
    struct RacingStore {
        inner: SqliteStore,
        lose_next_book: AtomicBool,
    }

    impl Store for RacingStore {
        fn append_audit(&self, event: AuditEvent) -> rollcall_store::StoreResult<()> {
            self.inner.append_audit(event)
        }

        fn get_recent_audits(&self, limit: usize) -> rollcall_store::StoreResult<Vec<AuditEvent>> {
            self.inner.get_recent_audits(limit)
        }

        fn upsert_attendance(&self, record: &AttendanceRecord) -> rollcall_store::StoreResult<bool> {
            self.inner.upsert_attendance(record)
        }

        fn get_attendance(
            &self,
            student_id: &UserId,
            subject_id: &SubjectId,
            date: NaiveDate,
        ) -> rollcall_store::StoreResult<Option<AttendanceRecord>> {
            self.inner.get_attendance(student_id, subject_id, date)
        }

        fn insert_venue(&self, id: &VenueId, name: &str, capacity: u32) -> rollcall_store::StoreResult<bool> {
            self.inner.insert_venue(id, name, capacity)
        }

        fn get_venue(&self, id: &VenueId) -> rollcall_store::StoreResult<Option<VenueRecord>> {
            self.inner.get_venue(id)
        }

        fn list_venues(&self) -> rollcall_store::StoreResult<Vec<VenueRecord>> {
            self.inner.list_venues()
        }

        fn try_book(
            &self,
            id: &VenueId,
            holder: &UserId,
            expiry: DateTime<Local>,
            now: DateTime<Local>,
        ) -> rollcall_store::StoreResult<bool> {
            if self.lose_next_book.swap(false, Ordering::SeqCst) {
                return Ok(false);
            }
            self.inner.try_book(id, holder, expiry, now)
        }

        fn release_if_holder(&self, id: &VenueId, holder: &UserId) -> rollcall_store::StoreResult<bool> {
            self.inner.release_if_holder(id, holder)
        }

        fn list_expired_bookings(
            &self,
            now: DateTime<Local>,
        ) -> rollcall_store::StoreResult<Vec<ExpiredBooking>> {
            self.inner.list_expired_bookings(now)
        }

        fn force_release(&self, id: &VenueId, expected_expiry_millis: i64) -> rollcall_store::StoreResult<bool> {
            self.inner.force_release(id, expected_expiry_millis)
        }

        fn insert_permission(&self, request: &PermissionRequest) -> rollcall_store::StoreResult<()> {
            self.inner.insert_permission(request)
        }

        fn get_permission(&self, id: &PermissionId) -> rollcall_store::StoreResult<Option<PermissionRequest>> {
            self.inner.get_permission(id)
        }

        fn review_permission(
            &self,
            id: &PermissionId,
            status: PermissionStatus,
            reviewer: &UserId,
            reviewed_at: DateTime<Local>,
        ) -> rollcall_store::StoreResult<bool> {
            self.inner.review_permission(id, status, reviewer, reviewed_at)
        }

        fn list_permissions(
            &self,
            status: Option<PermissionStatus>,
            student_id: Option<&UserId>,
        ) -> rollcall_store::StoreResult<Vec<PermissionRequest>> {
            self.inner.list_permissions(status, student_id)
        }

        fn is_healthy(&self) -> bool {
            self.inner.is_healthy()
        }
    }

    #[test]
    fn test_booking_retries_when_race_winner_already_left() {
        let store = Arc::new(RacingStore {
            inner: SqliteStore::in_memory().unwrap(),
            lose_next_book: AtomicBool::new(true),
        });
        let engine = CoreEngine::new(make_test_policy(), store.clone());
        engine.seed_venues().unwrap();

        // The first attempt loses, but the venue reads free afterwards
        let booked = engine
            .book(&Caller::teacher("T1"), &VenueId::new("V1"), Some(60), t0())
            .unwrap();
        assert_eq!(booked.value.state, BookingState::Booked);
        assert_eq!(booked.value.booked_by, Some(UserId::new("T1")));
        assert!(!store.lose_next_book.load(Ordering::SeqCst));
    }

    #[test]
    fn test_operations_are_audited() {
        let engine = make_engine();
        engine.book(&Caller::teacher("T1"), &VenueId::new("V1"), Some(60), t0()).unwrap();
        let _ = engine.book(&Caller::teacher("T2"), &VenueId::new("V1"), Some(60), t0());

        let audits = engine.recent_audits(10).unwrap();
        assert!(matches!(audits[0].event, AuditEventType::BookingRejected { .. }));
        assert!(matches!(audits[1].event, AuditEventType::VenueBooked { .. }));
    }
}
