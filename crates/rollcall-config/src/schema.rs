//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// QR check-in settings
    #[serde(default)]
    pub attendance: RawAttendance,

    /// Venue booking settings
    #[serde(default)]
    pub booking: RawBooking,

    /// Permission request settings
    #[serde(default)]
    pub permissions: RawPermissions,

    /// Venues to create at startup if they do not exist yet
    #[serde(default)]
    pub venues: Vec<RawVenue>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// How often lapsed bookings are swept, in seconds
    pub sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAttendance {
    /// Maximum delay between QR generation and check-in to count as present
    pub tolerance_minutes: Option<u64>,

    /// Advisory lifetime written into issued QR payloads
    pub qr_validity_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBooking {
    /// Duration used when a booking request does not name one
    pub default_duration_minutes: Option<u64>,

    /// Longest booking a caller may request
    pub max_duration_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPermissions {
    pub max_attachment_bytes: Option<usize>,
}

/// Venue seed
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawVenue {
    pub id: String,
    pub name: String,
    pub capacity: u32,
}
