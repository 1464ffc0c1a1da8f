//! Persistence layer for rollcalld
//!
//! Provides:
//! - Audit log (append-only)
//! - Attendance records keyed by (student, subject, date)
//! - Venues with conditional booking transitions
//! - Permission requests

mod audit;
mod sqlite;
mod traits;

pub use audit::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<StoreError> for rollcall_util::RollcallError {
    fn from(e: StoreError) -> Self {
        rollcall_util::RollcallError::Store(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
