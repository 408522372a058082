use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::booking::BookingId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplaintId(pub i64);

impl fmt::Display for ComplaintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplaintType {
    Service,
    Refund,
    Cancellation,
    Other,
}

impl ComplaintType {
    pub const ALL: [ComplaintType; 4] =
        [Self::Service, Self::Refund, Self::Cancellation, Self::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "SERVICE",
            Self::Refund => "REFUND",
            Self::Cancellation => "CANCELLATION",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SERVICE" => Some(Self::Service),
            "REFUND" => Some(Self::Refund),
            "CANCELLATION" => Some(Self::Cancellation),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Service => "service quality, staff, vehicle",
            Self::Refund => "refunds and payments",
            Self::Cancellation => "cancellations and changes",
            Self::Other => "anything else",
        }
    }
}

impl fmt::Display for ComplaintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplaintStatus {
    Pending,
}

impl ComplaintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    pub booking_id: BookingId,
    pub complaint_type: ComplaintType,
    pub description: String,
    pub status: ComplaintStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewComplaint {
    pub booking_id: BookingId,
    pub complaint_type: ComplaintType,
    pub description: String,
    pub created_at: NaiveDateTime,
}
