//! Shared utilities for rollcall
//!
//! This crate provides:
//! - ID types (UserId, SubjectId, VenueId, PermissionId, ClientId)
//! - Clock helpers (mockable wall-clock time, payload date/time parsing)
//! - The error taxonomy shared by the core and the daemon
//! - Default paths for socket, data, and config files

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
