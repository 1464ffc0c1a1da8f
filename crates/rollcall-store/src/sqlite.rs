//! SQLite-based store implementation
//!
//! Instants are stored as epoch milliseconds so that expiry comparisons
//! happen in SQL. Days are stored as `YYYY-MM-DD` text.

use chrono::{DateTime, Local, NaiveDate};
use rollcall_api::{
    Attachment, AttendanceRecord, AttendanceStatus, BookingState, PermissionRequest,
    PermissionStatus,
};
use rollcall_util::{
    from_epoch_millis, to_epoch_millis, PermissionId, SubjectId, UserId, VenueId,
    PAYLOAD_DATE_FORMAT,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{
    AuditEvent, AuditEventType, ExpiredBooking, Store, StoreError, StoreResult, VenueRecord,
};

const VENUE_COLUMNS: &str = "id, name, capacity, booking_state, booked_by, booking_expiry";

const PERMISSION_COLUMNS: &str = "id, student_id, subject_id, reason, attachment_type, \
     attachment, status, created_at, reviewed_by, reviewed_at";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("store lock poisoned".into()))
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- One row per (student, subject, day)
            CREATE TABLE IF NOT EXISTS attendance (
                student_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                day TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('present', 'absent')),
                recorded_at INTEGER NOT NULL,
                PRIMARY KEY (student_id, subject_id, day)
            );

            CREATE TABLE IF NOT EXISTS venues (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                capacity INTEGER NOT NULL CHECK (capacity > 0),
                booking_state TEXT NOT NULL DEFAULT 'free',
                booked_by TEXT,
                booking_expiry INTEGER,
                CHECK (
                    (booking_state = 'free' AND booked_by IS NULL AND booking_expiry IS NULL)
                    OR (booking_state = 'booked' AND booked_by IS NOT NULL
                        AND booking_expiry IS NOT NULL)
                )
            );

            CREATE TABLE IF NOT EXISTS permissions (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                attachment_type TEXT,
                attachment BLOB,
                status TEXT NOT NULL CHECK (status IN ('pending', 'approved', 'rejected')),
                created_at INTEGER NOT NULL,
                reviewed_by TEXT,
                reviewed_at INTEGER
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_venues_expiry ON venues(booking_state, booking_expiry);
            CREATE INDEX IF NOT EXISTS idx_permissions_status ON permissions(status);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn upsert_attendance(&self, record: &AttendanceRecord) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let day = format_day(record.date);

        let existed = tx
            .query_row(
                "SELECT 1 FROM attendance WHERE student_id = ?1 AND subject_id = ?2 AND day = ?3",
                params![record.student_id.as_str(), record.subject_id.as_str(), day],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        tx.execute(
            r#"
            INSERT INTO attendance (student_id, subject_id, day, status, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(student_id, subject_id, day)
            DO UPDATE SET status = excluded.status, recorded_at = excluded.recorded_at
            "#,
            params![
                record.student_id.as_str(),
                record.subject_id.as_str(),
                day,
                record.status.as_str(),
                to_epoch_millis(&record.recorded_at),
            ],
        )?;
        tx.commit()?;

        debug!(
            student_id = %record.student_id,
            subject_id = %record.subject_id,
            day = %day,
            status = record.status.as_str(),
            created = !existed,
            "Attendance upserted"
        );
        Ok(!existed)
    }

    fn get_attendance(
        &self,
        student_id: &UserId,
        subject_id: &SubjectId,
        date: NaiveDate,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let conn = self.lock()?;

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT status, recorded_at FROM attendance \
                 WHERE student_id = ?1 AND subject_id = ?2 AND day = ?3",
                params![student_id.as_str(), subject_id.as_str(), format_day(date)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(status, recorded_at)| {
            Ok(AttendanceRecord {
                student_id: student_id.clone(),
                subject_id: subject_id.clone(),
                date,
                status: AttendanceStatus::parse(&status)
                    .ok_or_else(|| bad_column("attendance.status", &status))?,
                recorded_at: local_from_millis(recorded_at)?,
            })
        })
        .transpose()
    }

    fn insert_venue(&self, id: &VenueId, name: &str, capacity: u32) -> StoreResult<bool> {
        let conn = self.lock()?;

        let inserted = conn.execute(
            "INSERT INTO venues (id, name, capacity) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO NOTHING",
            params![id.as_str(), name, capacity],
        )?;

        if inserted == 1 {
            debug!(venue_id = %id, capacity, "Venue inserted");
        }
        Ok(inserted == 1)
    }

    fn get_venue(&self, id: &VenueId) -> StoreResult<Option<VenueRecord>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM venues WHERE id = ?1", VENUE_COLUMNS),
                [id.as_str()],
                VenueRow::from_row,
            )
            .optional()?;

        row.map(VenueRow::into_record).transpose()
    }

    fn list_venues(&self) -> StoreResult<Vec<VenueRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!("SELECT {} FROM venues ORDER BY id", VENUE_COLUMNS))?;
        let rows = stmt.query_map([], VenueRow::from_row)?;

        rows.map(|row| row?.into_record()).collect()
    }

    fn try_book(
        &self,
        id: &VenueId,
        holder: &UserId,
        expiry: DateTime<Local>,
        now: DateTime<Local>,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;

        let changed = conn.execute(
            r#"
            UPDATE venues
            SET booking_state = 'booked', booked_by = ?2, booking_expiry = ?3
            WHERE id = ?1 AND (booking_state = 'free' OR booking_expiry < ?4)
            "#,
            params![
                id.as_str(),
                holder.as_str(),
                to_epoch_millis(&expiry),
                to_epoch_millis(&now),
            ],
        )?;

        Ok(changed == 1)
    }

    fn release_if_holder(&self, id: &VenueId, holder: &UserId) -> StoreResult<bool> {
        let conn = self.lock()?;

        let changed = conn.execute(
            r#"
            UPDATE venues
            SET booking_state = 'free', booked_by = NULL, booking_expiry = NULL
            WHERE id = ?1 AND booking_state = 'booked' AND booked_by = ?2
            "#,
            params![id.as_str(), holder.as_str()],
        )?;

        Ok(changed == 1)
    }

    fn list_expired_bookings(&self, now: DateTime<Local>) -> StoreResult<Vec<ExpiredBooking>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, booked_by, booking_expiry FROM venues \
             WHERE booking_state = 'booked' AND booking_expiry < ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([to_epoch_millis(&now)], |row| {
            Ok(ExpiredBooking {
                id: VenueId::new(row.get::<_, String>(0)?),
                holder: row.get::<_, Option<String>>(1)?.map(UserId::new),
                expiry_millis: row.get(2)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn force_release(&self, id: &VenueId, expected_expiry_millis: i64) -> StoreResult<bool> {
        let conn = self.lock()?;

        let changed = conn.execute(
            r#"
            UPDATE venues
            SET booking_state = 'free', booked_by = NULL, booking_expiry = NULL
            WHERE id = ?1 AND booking_state = 'booked' AND booking_expiry = ?2
            "#,
            params![id.as_str(), expected_expiry_millis],
        )?;

        Ok(changed == 1)
    }

    fn insert_permission(&self, request: &PermissionRequest) -> StoreResult<()> {
        let conn = self.lock()?;

        let (attachment_type, attachment) = match &request.attachment {
            Some(a) => (Some(a.content_type.as_str()), Some(a.data.as_slice())),
            None => (None, None),
        };

        conn.execute(
            &format!(
                "INSERT INTO permissions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                PERMISSION_COLUMNS
            ),
            params![
                request.id.to_string(),
                request.student_id.as_str(),
                request.subject_id.as_str(),
                request.reason,
                attachment_type,
                attachment,
                request.status.as_str(),
                to_epoch_millis(&request.created_at),
                request.reviewed_by.as_ref().map(|u| u.as_str()),
                request.reviewed_at.as_ref().map(to_epoch_millis),
            ],
        )?;

        debug!(permission_id = %request.id, student_id = %request.student_id, "Permission stored");
        Ok(())
    }

    fn get_permission(&self, id: &PermissionId) -> StoreResult<Option<PermissionRequest>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM permissions WHERE id = ?1", PERMISSION_COLUMNS),
                [id.to_string()],
                PermissionRow::from_row,
            )
            .optional()?;

        row.map(PermissionRow::into_request).transpose()
    }

    fn review_permission(
        &self,
        id: &PermissionId,
        status: PermissionStatus,
        reviewer: &UserId,
        reviewed_at: DateTime<Local>,
    ) -> StoreResult<bool> {
        let conn = self.lock()?;

        let changed = conn.execute(
            r#"
            UPDATE permissions
            SET status = ?2, reviewed_by = ?3, reviewed_at = ?4
            WHERE id = ?1 AND status = 'pending'
            "#,
            params![
                id.to_string(),
                status.as_str(),
                reviewer.as_str(),
                to_epoch_millis(&reviewed_at),
            ],
        )?;

        Ok(changed == 1)
    }

    fn list_permissions(
        &self,
        status: Option<PermissionStatus>,
        student_id: Option<&UserId>,
    ) -> StoreResult<Vec<PermissionRequest>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM permissions \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR student_id = ?2) \
             ORDER BY created_at, id",
            PERMISSION_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![status.map(|s| s.as_str()), student_id.map(|u| u.as_str())],
            PermissionRow::from_row,
        )?;

        rows.map(|row| row?.into_request()).collect()
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

struct VenueRow {
    id: String,
    name: String,
    capacity: u32,
    state: String,
    booked_by: Option<String>,
    booking_expiry: Option<i64>,
}

impl VenueRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            capacity: row.get(2)?,
            state: row.get(3)?,
            booked_by: row.get(4)?,
            booking_expiry: row.get(5)?,
        })
    }

    fn into_record(self) -> StoreResult<VenueRecord> {
        let state = match self.state.as_str() {
            "free" => BookingState::Free,
            "booked" => BookingState::Booked,
            other => return Err(bad_column("venues.booking_state", other)),
        };

        Ok(VenueRecord {
            id: VenueId::new(self.id),
            name: self.name,
            capacity: self.capacity,
            state,
            booked_by: self.booked_by.map(UserId::new),
            booking_expiry: self.booking_expiry.map(local_from_millis).transpose()?,
        })
    }
}

struct PermissionRow {
    id: String,
    student_id: String,
    subject_id: String,
    reason: String,
    attachment_type: Option<String>,
    attachment: Option<Vec<u8>>,
    status: String,
    created_at: i64,
    reviewed_by: Option<String>,
    reviewed_at: Option<i64>,
}

impl PermissionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            subject_id: row.get(2)?,
            reason: row.get(3)?,
            attachment_type: row.get(4)?,
            attachment: row.get(5)?,
            status: row.get(6)?,
            created_at: row.get(7)?,
            reviewed_by: row.get(8)?,
            reviewed_at: row.get(9)?,
        })
    }

    fn into_request(self) -> StoreResult<PermissionRequest> {
        let id = PermissionId::parse(&self.id).ok_or_else(|| bad_column("permissions.id", &self.id))?;
        let status = PermissionStatus::parse(&self.status)
            .ok_or_else(|| bad_column("permissions.status", &self.status))?;
        let attachment = match (self.attachment_type, self.attachment) {
            (Some(content_type), Some(data)) => Some(Attachment { content_type, data }),
            _ => None,
        };

        Ok(PermissionRequest {
            id,
            student_id: UserId::new(self.student_id),
            subject_id: SubjectId::new(self.subject_id),
            reason: self.reason,
            attachment,
            status,
            created_at: local_from_millis(self.created_at)?,
            reviewed_by: self.reviewed_by.map(UserId::new),
            reviewed_at: self.reviewed_at.map(local_from_millis).transpose()?,
        })
    }
}

fn format_day(date: NaiveDate) -> String {
    date.format(PAYLOAD_DATE_FORMAT).to_string()
}

fn local_from_millis(ms: i64) -> StoreResult<DateTime<Local>> {
    from_epoch_millis(ms)
        .ok_or_else(|| StoreError::Serialization(format!("timestamp out of range: {}", ms)))
}

fn bad_column(column: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("unexpected value in {}: {:?}", column, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::{Arc, Barrier};

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn record(status: AttendanceStatus, recorded_at: DateTime<Local>) -> AttendanceRecord {
        AttendanceRecord {
            student_id: UserId::new("s1"),
            subject_id: SubjectId::new("CS101"),
            date: day(),
            status,
            recorded_at,
        }
    }

    fn store_with_venue() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.insert_venue(&VenueId::new("hall-a"), "Hall A", 100).unwrap());
        store
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted)).unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::PolicyLoaded { venue_count: 2 }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, AuditEventType::PolicyLoaded { venue_count: 2 }));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn test_attendance_upsert_keeps_one_row() {
        let store = SqliteStore::in_memory().unwrap();

        assert!(store.upsert_attendance(&record(AttendanceStatus::Present, at(9, 5))).unwrap());
        assert!(!store.upsert_attendance(&record(AttendanceStatus::Absent, at(9, 40))).unwrap());

        let stored = store
            .get_attendance(&UserId::new("s1"), &SubjectId::new("CS101"), day())
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, AttendanceStatus::Absent);
        assert_eq!(stored.recorded_at, at(9, 40));

        let conn = store.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM attendance", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_duplicate_venue_not_inserted() {
        let store = store_with_venue();
        assert!(!store.insert_venue(&VenueId::new("hall-a"), "Other", 5).unwrap());
        assert_eq!(store.get_venue(&VenueId::new("hall-a")).unwrap().unwrap().name, "Hall A");
    }

    #[test]
    fn test_booking_transitions() {
        let store = store_with_venue();
        let venue = VenueId::new("hall-a");
        let t1 = UserId::new("t1");
        let t2 = UserId::new("t2");
        let expiry = at(12, 0);

        assert!(store.try_book(&venue, &t1, expiry, at(9, 0)).unwrap());
        assert!(!store.try_book(&venue, &t2, at(13, 0), at(11, 59)).unwrap());
        // Expiry is exclusive: a booking ending exactly at now is still live
        assert!(!store.try_book(&venue, &t2, at(13, 0), at(12, 0)).unwrap());

        assert!(!store.release_if_holder(&venue, &t2).unwrap());
        let stored = store.get_venue(&venue).unwrap().unwrap();
        assert_eq!(stored.booked_by, Some(t1.clone()));
        assert_eq!(stored.booking_expiry, Some(expiry));

        assert!(store.release_if_holder(&venue, &t1).unwrap());
        let stored = store.get_venue(&venue).unwrap().unwrap();
        assert!(!stored.is_booked());
        assert!(stored.booked_by.is_none());
        assert!(stored.booking_expiry.is_none());
    }

    #[test]
    fn test_lapsed_booking_can_be_taken_over() {
        let store = store_with_venue();
        let venue = VenueId::new("hall-a");

        assert!(store.try_book(&venue, &UserId::new("t1"), at(12, 0), at(9, 0)).unwrap());
        assert!(store.try_book(&venue, &UserId::new("t2"), at(15, 0), at(12, 1)).unwrap());
        assert_eq!(
            store.get_venue(&venue).unwrap().unwrap().booked_by,
            Some(UserId::new("t2"))
        );
    }

    #[test]
    fn test_force_release_checks_expiry() {
        let store = store_with_venue();
        let venue = VenueId::new("hall-a");

        store.try_book(&venue, &UserId::new("t1"), at(12, 0), at(9, 0)).unwrap();
        let expired = store.list_expired_bookings(at(12, 1)).unwrap();
        assert_eq!(
            expired,
            vec![ExpiredBooking {
                id: venue.clone(),
                holder: Some(UserId::new("t1")),
                expiry_millis: to_epoch_millis(&at(12, 0)),
            }]
        );
        assert!(store.list_expired_bookings(at(12, 0)).unwrap().is_empty());

        // A different expiry means somebody re-booked in between
        let stale = to_epoch_millis(&(at(12, 0) + Duration::minutes(1)));
        assert!(!store.force_release(&venue, stale).unwrap());
        assert!(store.force_release(&venue, expired[0].expiry_millis).unwrap());
        assert!(!store.force_release(&venue, expired[0].expiry_millis).unwrap());
        assert!(store.list_expired_bookings(at(12, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_expiry_still_listed_and_releasable() {
        let store = store_with_venue();
        assert!(store.insert_venue(&VenueId::new("hall-b"), "Hall B", 40).unwrap());
        store
            .try_book(&VenueId::new("hall-a"), &UserId::new("t1"), at(10, 0), at(9, 0))
            .unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "UPDATE venues SET booking_state = 'booked', booked_by = 't2', booking_expiry = ?1 \
                 WHERE id = 'hall-b'",
                [i64::MIN],
            )
            .unwrap();

        // The full record cannot be decoded, the sweep listing still can
        assert!(store.get_venue(&VenueId::new("hall-b")).is_err());

        let expired = store.list_expired_bookings(at(11, 0)).unwrap();
        let ids: Vec<_> = expired.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["hall-a", "hall-b"]);
        assert_eq!(expired[1].expiry_millis, i64::MIN);

        assert!(store.force_release(&VenueId::new("hall-b"), i64::MIN).unwrap());
        assert!(!store.get_venue(&VenueId::new("hall-b")).unwrap().unwrap().is_booked());
    }

    #[test]
    fn test_venue_consistency_enforced() {
        let store = store_with_venue();
        let conn = store.lock().unwrap();
        let result = conn.execute(
            "UPDATE venues SET booking_state = 'booked' WHERE id = 'hall-a'",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_concurrent_booking_single_winner() {
        let store = Arc::new(store_with_venue());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .try_book(
                            &VenueId::new("hall-a"),
                            &UserId::new(format!("t{}", i)),
                            at(12, 0),
                            at(9, 0),
                        )
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_permission_review_once() {
        let store = SqliteStore::in_memory().unwrap();
        let request = PermissionRequest {
            id: PermissionId::new(),
            student_id: UserId::new("s1"),
            subject_id: SubjectId::new("CS101"),
            reason: "Medical appointment".into(),
            attachment: Some(Attachment {
                content_type: "application/pdf".into(),
                data: vec![1, 2, 3],
            }),
            status: PermissionStatus::Pending,
            created_at: at(8, 0),
            reviewed_by: None,
            reviewed_at: None,
        };
        store.insert_permission(&request).unwrap();

        let reviewer = UserId::new("t1");
        assert!(store
            .review_permission(&request.id, PermissionStatus::Approved, &reviewer, at(10, 0))
            .unwrap());
        assert!(!store
            .review_permission(&request.id, PermissionStatus::Rejected, &reviewer, at(10, 5))
            .unwrap());

        let stored = store.get_permission(&request.id).unwrap().unwrap();
        assert_eq!(stored.status, PermissionStatus::Approved);
        assert_eq!(stored.reviewed_by, Some(reviewer));
        assert_eq!(stored.attachment, request.attachment);

        assert!(store.list_permissions(Some(PermissionStatus::Pending), None).unwrap().is_empty());
        assert_eq!(store.list_permissions(None, Some(&UserId::new("s1"))).unwrap().len(), 1);
        assert!(store.list_permissions(None, Some(&UserId::new("s2"))).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_venue(&VenueId::new("lab-2"), "Lab 2", 40).unwrap();
            store.try_book(&VenueId::new("lab-2"), &UserId::new("t1"), at(12, 0), at(9, 0)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let venue = store.get_venue(&VenueId::new("lab-2")).unwrap().unwrap();
        assert!(venue.is_booked());
        assert_eq!(venue.booking_expiry, Some(at(12, 0)));
    }
}
