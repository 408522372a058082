use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::booking::BookingId;
use crate::domain::trip::TripId;

/// Append-only audit row written once per fee-charged trip change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingChange {
    pub id: i64,
    pub booking_id: BookingId,
    pub old_departure: NaiveDateTime,
    pub new_departure: NaiveDateTime,
    pub fee: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewBookingChange {
    pub booking_id: BookingId,
    pub old_departure: NaiveDateTime,
    pub new_departure: NaiveDateTime,
    pub fee: i64,
}

/// Expected business refusals. These travel as data, never as errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionReason {
    InvalidStatus,
    PastCutoff,
    SeatsUnavailable,
    NotCancellable,
    RouteMismatch,
}

impl RejectionReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStatus => "invalid-status",
            Self::PastCutoff => "past-cutoff",
            Self::SeatsUnavailable => "seats-unavailable",
            Self::NotCancellable => "not-cancellable",
            Self::RouteMismatch => "route-mismatch",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeQuote {
    Allowed { fee: i64, new_departure: NaiveDateTime },
    NotAllowed { reason: RejectionReason },
}

impl ChangeQuote {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn fee(&self) -> i64 {
        match self {
            Self::Allowed { fee, .. } => *fee,
            Self::NotAllowed { .. } => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeReceipt {
    pub booking_id: BookingId,
    pub old_departure: NaiveDateTime,
    pub new_departure: NaiveDateTime,
    pub fee: i64,
    pub old_trip_id: Option<TripId>,
    pub new_trip_id: TripId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChangeOutcome {
    Applied(ChangeReceipt),
    /// The target trip already is the booking's trip. Nothing was written.
    Unchanged(ChangeReceipt),
    Rejected { reason: RejectionReason },
}

impl ChangeOutcome {
    pub fn receipt(&self) -> Option<&ChangeReceipt> {
        match self {
            Self::Applied(receipt) | Self::Unchanged(receipt) => Some(receipt),
            Self::Rejected { .. } => None,
        }
    }

    pub fn is_no_op(&self) -> bool {
        matches!(self, Self::Unchanged(_))
    }
}
