//! Configuration validation

use crate::policy::{DEFAULT_BOOKING_MINUTES, DEFAULT_MAX_BOOKING_MINUTES};
use crate::schema::{RawConfig, RawVenue};
use std::collections::HashSet;
use thiserror::Error;

/// Accepted sweep interval range, in seconds
pub const SWEEP_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 60..=300;

/// Upper bound on any minute-valued setting (one week)
const MAX_MINUTES: u64 = 7 * 24 * 60;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Venue '{venue_id}': {message}")]
    VenueError { venue_id: String, message: String },

    #[error("Duplicate venue ID: {0}")]
    DuplicateVenueId(String),

    #[error("{field} = {value}: {message}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        message: String,
    },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    for venue in &config.venues {
        // Ids are trimmed when the policy is built
        let id = venue.id.trim();
        if !seen_ids.insert(id) {
            errors.push(ValidationError::DuplicateVenueId(id.to_string()));
        }
    }

    for venue in &config.venues {
        errors.extend(validate_venue(venue));
    }

    if let Some(secs) = config
        .service
        .sweep_interval_seconds
        .filter(|s| !SWEEP_INTERVAL_RANGE.contains(s))
    {
        errors.push(ValidationError::OutOfRange {
            field: "service.sweep_interval_seconds",
            value: secs,
            message: format!(
                "must be between {} and {}",
                SWEEP_INTERVAL_RANGE.start(),
                SWEEP_INTERVAL_RANGE.end()
            ),
        });
    }

    let minute_fields = [
        ("attendance.tolerance_minutes", config.attendance.tolerance_minutes),
        ("attendance.qr_validity_minutes", config.attendance.qr_validity_minutes),
        ("booking.default_duration_minutes", config.booking.default_duration_minutes),
        ("booking.max_duration_minutes", config.booking.max_duration_minutes),
    ];
    for (field, value) in minute_fields {
        if let Some(value) = value {
            errors.extend(check_minutes(field, value));
        }
    }

    let default_duration = config
        .booking
        .default_duration_minutes
        .unwrap_or(DEFAULT_BOOKING_MINUTES);
    let max_duration = config
        .booking
        .max_duration_minutes
        .unwrap_or(DEFAULT_MAX_BOOKING_MINUTES);
    if default_duration > max_duration {
        errors.push(ValidationError::GlobalError(format!(
            "booking.default_duration_minutes ({}) exceeds booking.max_duration_minutes ({})",
            default_duration, max_duration
        )));
    }

    if config.permissions.max_attachment_bytes == Some(0) {
        errors.push(ValidationError::OutOfRange {
            field: "permissions.max_attachment_bytes",
            value: 0,
            message: "must be positive".into(),
        });
    }

    errors
}

fn check_minutes(field: &'static str, value: u64) -> Option<ValidationError> {
    if value == 0 || value > MAX_MINUTES {
        Some(ValidationError::OutOfRange {
            field,
            value,
            message: format!("must be between 1 and {}", MAX_MINUTES),
        })
    } else {
        None
    }
}

fn validate_venue(venue: &RawVenue) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if venue.id.trim().is_empty() {
        errors.push(ValidationError::VenueError {
            venue_id: venue.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    if venue.name.trim().is_empty() {
        errors.push(ValidationError::VenueError {
            venue_id: venue.id.clone(),
            message: "name cannot be empty".into(),
        });
    }

    if venue.capacity == 0 {
        errors.push(ValidationError::VenueError {
            venue_id: venue.id.clone(),
            message: "capacity must be positive".into(),
        });
    }

    errors
}
