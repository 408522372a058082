pub mod audit;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod fees;
pub mod flows;

pub use audit::{
    AuditContext, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::billing::{CancellationOutcome, CancellationReceipt, Invoice};
pub use domain::booking::{Booking, BookingId, BookingStatus, Route};
pub use domain::change::{BookingChange, ChangeOutcome, ChangeQuote, ChangeReceipt, RejectionReason};
pub use domain::complaint::{Complaint, ComplaintId, ComplaintStatus, ComplaintType, NewComplaint};
pub use domain::conversation::{ConversationState, ExtractedFields, Intent, MediaType};
pub use domain::trip::{Trip, TripId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use fees::BookingPolicy;
pub use flows::{IntentRouter, RouteNode, TurnMedia};
