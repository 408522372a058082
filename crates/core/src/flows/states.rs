use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::conversation::{ConversationState, MediaType};

/// Named steps of the conversation graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteNode {
    MediaIngest,
    ImageVision,
    AudioTranscribe,
    TicketParse,
    MergeMediaText,
    Classify,
    Extract,
    Candidates,
    Apply,
    CheckBooking,
    ViewTrips,
    CancelBooking,
    GetInvoice,
    CreateComplaint,
    Faq,
    Fallback,
    End,
}

impl RouteNode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MediaIngest => "media_ingest",
            Self::ImageVision => "image_vision",
            Self::AudioTranscribe => "audio_transcribe",
            Self::TicketParse => "ticket_parse",
            Self::MergeMediaText => "merge_media_text",
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Candidates => "candidates",
            Self::Apply => "apply",
            Self::CheckBooking => "check_booking",
            Self::ViewTrips => "view_trips",
            Self::CancelBooking => "cancel_booking",
            Self::GetInvoice => "get_invoice",
            Self::CreateComplaint => "create_complaint",
            Self::Faq => "faq",
            Self::Fallback => "fallback",
            Self::End => "end",
        }
    }

    /// Handlers after which the graph ends unconditionally.
    pub fn is_terminal_handler(&self) -> bool {
        matches!(
            self,
            Self::Candidates
                | Self::Apply
                | Self::CheckBooking
                | Self::ViewTrips
                | Self::CancelBooking
                | Self::GetInvoice
                | Self::CreateComplaint
                | Self::Faq
                | Self::Fallback
        )
    }

    pub fn is_media_step(&self) -> bool {
        matches!(
            self,
            Self::MediaIngest
                | Self::ImageVision
                | Self::AudioTranscribe
                | Self::TicketParse
                | Self::MergeMediaText
        )
    }
}

impl fmt::Display for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media attached to the current turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMedia {
    pub media_type: Option<MediaType>,
    pub has_attachments: bool,
}

impl TurnMedia {
    pub fn none() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RouteContext<'a> {
    pub state: &'a ConversationState,
    pub media: TurnMedia,
}

impl<'a> RouteContext<'a> {
    pub fn new(state: &'a ConversationState, media: TurnMedia) -> Self {
        Self { state, media }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTransition {
    pub from: RouteNode,
    pub to: RouteNode,
}
