//! Error types for rollcall

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::{UserId, VenueId};

/// Core error type for rollcall operations.
///
/// The first four variants are rejections reported back to the caller;
/// the rest are infrastructure failures.
#[derive(Debug, Error)]
pub enum RollcallError {
    #[error("Venue {venue_id} is already booked by {holder} until {until}")]
    AlreadyBooked {
        venue_id: VenueId,
        holder: UserId,
        until: DateTime<Local>,
    },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RollcallError {
    pub fn not_authorized(msg: impl Into<String>) -> Self {
        Self::NotAuthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a rejection of the request rather than a fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::AlreadyBooked { .. }
                | Self::NotAuthorized(_)
                | Self::NotFound(_)
                | Self::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RollcallError>;
