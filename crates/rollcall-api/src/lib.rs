//! Protocol types for rollcalld IPC
//!
//! This crate defines the stable API between rollcalld and its clients
//! (the request layer and `rollcallctl`):
//! - Commands (requests from clients)
//! - Responses
//! - Events (service -> clients)
//! - Domain types shared with the core (roles, statuses, venue views)

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
