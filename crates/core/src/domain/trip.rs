use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::booking::{format_departure, Booking, Route};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TripId(pub String);

impl TripId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TripId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TripId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A scheduled departure with finite seat inventory.
///
/// `seats_available` stays within `0..=seats_total`; stores enforce this with guarded
/// updates and a table-level check constraint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub route: Route,
    pub departure: NaiveDateTime,
    pub seats_total: i64,
    pub seats_available: i64,
    pub base_price: i64,
}

impl Trip {
    pub fn has_free_seat(&self) -> bool {
        self.seats_available > 0
    }

    pub fn can_release_seat(&self) -> bool {
        self.seats_available < self.seats_total
    }

    pub fn departure_key(&self) -> String {
        format_departure(&self.departure)
    }

    /// Whether this trip is the booking's current trip: same route and the exact same
    /// departure instant. There is no stored reference between the two.
    pub fn serves(&self, booking: &Booking) -> bool {
        self.route == booking.route && self.departure == booking.departure
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Trip, TripId};
    use crate::domain::booking::{Booking, BookingId, BookingStatus, Route};

    fn at(day: u32, hour: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .expect("valid datetime")
    }

    #[test]
    fn trip_serves_booking_only_on_exact_route_and_departure() {
        let booking = Booking {
            id: BookingId("VX123456".to_string()),
            route: Route::new("HCM", "Da Lat"),
            departure: at(5, 20),
            status: BookingStatus::Paid,
            seat_class: "Standard".to_string(),
            contact_phone: None,
        };
        let mut trip = Trip {
            id: TripId("T003".to_string()),
            route: Route::new("HCM", "Da Lat"),
            departure: at(5, 20),
            seats_total: 40,
            seats_available: 1,
            base_price: 250_000,
        };
        assert!(trip.serves(&booking));

        trip.departure = at(5, 22);
        assert!(!trip.serves(&booking));

        trip.departure = at(5, 20);
        trip.route = Route::new("Da Lat", "HCM");
        assert!(!trip.serves(&booking));
    }

    #[test]
    fn seat_bounds_are_reported() {
        let trip = Trip {
            id: TripId("T004".to_string()),
            route: Route::new("HCM", "Da Lat"),
            departure: at(5, 22),
            seats_total: 40,
            seats_available: 0,
            base_price: 250_000,
        };
        assert!(!trip.has_free_seat());
        assert!(trip.can_release_seat());
    }
}
