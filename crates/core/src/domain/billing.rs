use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::booking::{BookingId, BookingStatus, Route};
use crate::domain::change::RejectionReason;
use crate::domain::trip::TripId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationReceipt {
    pub booking_id: BookingId,
    pub released_trip_id: Option<TripId>,
    pub base_price: i64,
    pub change_fees: i64,
    pub refund_amount: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CancellationOutcome {
    Cancelled(CancellationReceipt),
    Rejected { reason: RejectionReason },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub booking_id: BookingId,
    pub route: Route,
    pub departure: NaiveDateTime,
    pub seat_class: String,
    pub status: BookingStatus,
    pub base_price: i64,
    /// False when the current trip could not be resolved and the configured
    /// fallback price was used.
    pub base_price_resolved: bool,
    pub change_fees: i64,
    pub total_amount: i64,
    pub issued_at: NaiveDateTime,
}
