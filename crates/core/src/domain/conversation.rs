use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::booking::BookingId;
use crate::domain::complaint::ComplaintType;
use crate::domain::trip::TripId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ChangeTime,
    CheckBooking,
    ViewTrips,
    CancelBooking,
    GetInvoice,
    CreateComplaint,
    Faq,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Self::ChangeTime,
        Self::CheckBooking,
        Self::ViewTrips,
        Self::CancelBooking,
        Self::GetInvoice,
        Self::CreateComplaint,
        Self::Faq,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChangeTime => "change_time",
            Self::CheckBooking => "check_booking",
            Self::ViewTrips => "view_trips",
            Self::CancelBooking => "cancel_booking",
            Self::GetInvoice => "get_invoice",
            Self::CreateComplaint => "create_complaint",
            Self::Faq => "faq",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|intent| intent.as_str() == normalized)
    }

    /// Intents whose handler is reached straight from `classify`, regardless of
    /// which change-time fields are already known.
    pub fn is_directly_actionable(&self) -> bool {
        matches!(
            self,
            Self::CheckBooking
                | Self::ViewTrips
                | Self::CancelBooking
                | Self::GetInvoice
                | Self::CreateComplaint
                | Self::Faq
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Audio,
    None,
}

impl MediaType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "none" | "" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Media,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Best-effort output of an extractor. Every field may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub intent: Option<Intent>,
    pub booking_id: Option<BookingId>,
    pub date: Option<NaiveDate>,
    pub trip_id: Option<TripId>,
    pub route_from: Option<String>,
    pub route_to: Option<String>,
    pub complaint_type: Option<ComplaintType>,
    pub description: Option<String>,
}

impl ExtractedFields {
    pub fn has_change_signal(&self) -> bool {
        self.booking_id.is_some() || self.date.is_some() || self.trip_id.is_some()
    }
}

/// Fields accumulated across the turns of one thread.
///
/// Merging is monotonic: an incoming empty value never replaces a known one, and no field is
/// ever cleared for the lifetime of the thread. Users can therefore answer a missing-field
/// prompt with only the missing value. Only `result` and `error` are per turn.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub intent: Option<Intent>,
    pub booking_id: Option<BookingId>,
    pub date: Option<NaiveDate>,
    pub trip_id: Option<TripId>,
    pub route_from: Option<String>,
    pub route_to: Option<String>,
    pub complaint_type: Option<ComplaintType>,
    pub description: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub messages: Vec<ConversationMessage>,
}

impl ConversationState {
    pub fn merge(&mut self, updates: ExtractedFields) {
        if let Some(intent) = updates.intent {
            self.intent = Some(intent);
        }
        if let Some(booking_id) = updates.booking_id.filter(|id| !id.as_str().trim().is_empty()) {
            self.booking_id = Some(booking_id);
        }
        if let Some(date) = updates.date {
            self.date = Some(date);
        }
        if let Some(trip_id) = updates.trip_id.filter(|id| !id.as_str().trim().is_empty()) {
            self.trip_id = Some(trip_id);
        }
        merge_text(&mut self.route_from, updates.route_from);
        merge_text(&mut self.route_to, updates.route_to);
        if let Some(complaint_type) = updates.complaint_type {
            self.complaint_type = Some(complaint_type);
        }
        merge_text(&mut self.description, updates.description);
    }

    pub fn has_change_signal(&self) -> bool {
        self.booking_id.is_some() || self.date.is_some() || self.trip_id.is_some()
    }

    /// Drops the previous turn's result and error. Accumulated fields are untouched.
    pub fn start_turn(&mut self) {
        self.result = None;
        self.error = None;
    }

    pub fn record_result(&mut self, result: serde_json::Value) {
        self.result = Some(result);
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        if !error.trim().is_empty() {
            self.error = Some(error);
        }
    }

    pub fn push_message(&mut self, role: MessageRole, content: impl Into<String>) {
        self.messages.push(ConversationMessage { role, content: content.into() });
    }

    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
            .map(|message| message.content.as_str())
    }
}

fn merge_text(slot: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            *slot = Some(trimmed.to_string());
        }
    }
}
