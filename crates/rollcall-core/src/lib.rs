//! Core policy engine for rollcalld
//!
//! This crate holds the two time-bounded policies:
//! - The check-in window (present iff the QR code was scanned within the tolerance)
//! - The venue booking lifecycle (free -> booked -> free, by release or expiry)
//!
//! Every operation takes the current time as an argument.

mod engine;
mod events;
mod venue;
mod window;

pub use engine::*;
pub use events::*;
pub use venue::*;
pub use window::*;
