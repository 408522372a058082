use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Wire and storage format for departure times. Current-trip resolution compares
/// these strings exactly, so every writer must go through [`format_departure`].
pub const DEPARTURE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_departure(departure: &NaiveDateTime) -> String {
    departure.format(DEPARTURE_FORMAT).to_string()
}

pub fn parse_departure(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    NaiveDateTime::parse_from_str(trimmed, DEPARTURE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

pub fn parse_travel_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BookingId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Paid,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PAID" => Some(Self::Paid),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub from: String,
    pub to: String,
}

impl Route {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into() }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub route: Route,
    pub departure: NaiveDateTime,
    pub status: BookingStatus,
    pub seat_class: String,
    pub contact_phone: Option<String>,
}

impl Booking {
    pub fn is_paid(&self) -> bool {
        self.status == BookingStatus::Paid
    }

    pub fn departure_key(&self) -> String {
        format_departure(&self.departure)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{format_departure, parse_departure, parse_travel_date, BookingStatus, Route};

    #[test]
    fn departure_format_round_trips_through_storage_representation() {
        let departure = NaiveDate::from_ymd_opt(2025, 9, 5)
            .and_then(|date| date.and_hms_opt(20, 0, 0))
            .expect("valid datetime");

        assert_eq!(format_departure(&departure), "2025-09-05T20:00:00");
        assert_eq!(parse_departure("2025-09-05T20:00:00"), Some(departure));
        assert_eq!(parse_departure("2025-09-05T20:00"), Some(departure));
    }

    #[test]
    fn travel_date_rejects_non_iso_values() {
        assert!(parse_travel_date("2025-09-06").is_some());
        assert!(parse_travel_date("06/09/2025").is_none());
        assert!(parse_travel_date("2025-13-01").is_none());
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(BookingStatus::parse("paid"), Some(BookingStatus::Paid));
        assert_eq!(BookingStatus::parse("CANCELLED"), Some(BookingStatus::Cancelled));
        assert_eq!(BookingStatus::parse("refunded"), None);
    }

    #[test]
    fn route_renders_with_arrow() {
        assert_eq!(Route::new("HCM", "Da Lat").to_string(), "HCM → Da Lat");
    }
}
