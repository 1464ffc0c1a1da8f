//! Validated policy structures

use crate::schema::{
    RawAttendance, RawBooking, RawConfig, RawPermissions, RawServiceConfig, RawVenue,
};
use rollcall_util::{data_dir_without_env, socket_path_without_env, VenueId};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TOLERANCE_MINUTES: u64 = 30;
pub const DEFAULT_QR_VALIDITY_MINUTES: u64 = 30;
pub const DEFAULT_BOOKING_MINUTES: u64 = 180;
pub const DEFAULT_MAX_BOOKING_MINUTES: u64 = 24 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub attendance: AttendancePolicy,
    pub booking: BookingPolicy,
    pub permissions: PermissionPolicy,

    /// Venues created at startup when missing
    pub venues: Vec<VenueSeed>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            attendance: AttendancePolicy::from_raw(raw.attendance),
            booking: BookingPolicy::from_raw(raw.booking),
            permissions: PermissionPolicy::from_raw(raw.permissions),
            venues: raw.venues.into_iter().map(VenueSeed::from_raw).collect(),
        }
    }

    pub fn get_venue_seed(&self, id: &VenueId) -> Option<&VenueSeed> {
        self.venues.iter().find(|v| &v.id == id)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub sweep_interval: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            sweep_interval: Duration::from_secs(
                raw.sweep_interval_seconds
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// QR check-in window settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendancePolicy {
    pub tolerance_minutes: u64,
    pub qr_validity_minutes: u64,
}

impl AttendancePolicy {
    fn from_raw(raw: RawAttendance) -> Self {
        Self {
            tolerance_minutes: raw.tolerance_minutes.unwrap_or(DEFAULT_TOLERANCE_MINUTES),
            qr_validity_minutes: raw
                .qr_validity_minutes
                .unwrap_or(DEFAULT_QR_VALIDITY_MINUTES),
        }
    }

    pub fn tolerance(&self) -> chrono::Duration {
        rollcall_util::minutes(self.tolerance_minutes)
    }

    pub fn qr_validity(&self) -> chrono::Duration {
        rollcall_util::minutes(self.qr_validity_minutes)
    }
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self::from_raw(RawAttendance::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub default_duration_minutes: u64,
    pub max_duration_minutes: u64,
}

impl BookingPolicy {
    fn from_raw(raw: RawBooking) -> Self {
        Self {
            default_duration_minutes: raw
                .default_duration_minutes
                .unwrap_or(DEFAULT_BOOKING_MINUTES),
            max_duration_minutes: raw
                .max_duration_minutes
                .unwrap_or(DEFAULT_MAX_BOOKING_MINUTES),
        }
    }

    /// Resolve a requested duration, or None if it is out of range
    pub fn resolve_duration(&self, requested: Option<u64>) -> Option<chrono::Duration> {
        let minutes = requested.unwrap_or(self.default_duration_minutes);
        if minutes == 0 || minutes > self.max_duration_minutes {
            return None;
        }
        Some(rollcall_util::minutes(minutes))
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self::from_raw(RawBooking::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionPolicy {
    pub max_attachment_bytes: usize,
}

impl PermissionPolicy {
    fn from_raw(raw: RawPermissions) -> Self {
        Self {
            max_attachment_bytes: raw
                .max_attachment_bytes
                .unwrap_or(DEFAULT_MAX_ATTACHMENT_BYTES),
        }
    }
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::from_raw(RawPermissions::default())
    }
}

/// Venue declared in the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueSeed {
    pub id: VenueId,
    pub name: String,
    pub capacity: u32,
}

impl VenueSeed {
    fn from_raw(raw: RawVenue) -> Self {
        Self {
            id: VenueId::new(raw.id.trim()),
            name: raw.name,
            capacity: raw.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let policy = Policy::default();
        assert_eq!(policy.attendance.tolerance_minutes, 30);
        assert_eq!(policy.booking.default_duration_minutes, 180);
        assert_eq!(policy.service.sweep_interval, Duration::from_secs(60));
        assert_eq!(policy.permissions.max_attachment_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn resolve_duration_bounds() {
        let booking = BookingPolicy {
            default_duration_minutes: 180,
            max_duration_minutes: 240,
        };

        assert_eq!(booking.resolve_duration(None), Some(chrono::Duration::minutes(180)));
        assert_eq!(booking.resolve_duration(Some(240)), Some(chrono::Duration::minutes(240)));
        assert_eq!(booking.resolve_duration(Some(241)), None);
        assert_eq!(booking.resolve_duration(Some(0)), None);
    }
}
