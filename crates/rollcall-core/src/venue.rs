//! Venue booking state as observed at a given instant

use chrono::{DateTime, Local};
use rollcall_api::{BookingState, VenueView};
use rollcall_store::VenueRecord;

/// Whether the stored booking has run out. Expiry is exclusive: a booking
/// whose expiry equals `now` is still held.
pub fn is_lapsed(record: &VenueRecord, now: DateTime<Local>) -> bool {
    record.is_booked() && record.booking_expiry.is_some_and(|expiry| expiry < now)
}

/// Present a stored venue to clients. Lapsed bookings read as free even
/// before the sweep has cleared them.
pub fn view_at(record: &VenueRecord, now: DateTime<Local>) -> VenueView {
    let held = record.is_booked() && !is_lapsed(record, now);

    VenueView {
        venue_id: record.id.clone(),
        name: record.name.clone(),
        capacity: record.capacity,
        state: if held {
            BookingState::Booked
        } else {
            BookingState::Free
        },
        booked_by: record.booked_by.clone().filter(|_| held),
        booking_expiry: record.booking_expiry.filter(|_| held),
    }
}
