//! One function per terminal graph node.
//!
//! Each handler reads the accumulated conversation state, calls the reservation engine
//! when it has what it needs, records the structured result on the state, and returns the
//! reply text. Missing fields produce a prompt instead of an engine call. Structured
//! refusals become replies with `state.error` set to the refusal code; only lookups of
//! unknown ids and store faults come back as `Err`.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::json;

use rebook_core::audit::AuditContext;
use rebook_core::domain::billing::CancellationOutcome;
use rebook_core::domain::booking::Route;
use rebook_core::domain::change::{ChangeOutcome, RejectionReason};
use rebook_core::domain::complaint::ComplaintType;
use rebook_core::domain::conversation::ConversationState;
use rebook_core::domain::trip::Trip;
use rebook_core::errors::DomainError;
use rebook_db::{EngineError, ReservationEngine, ReservationStore};

pub const FALLBACK_REPLY: &str = "Here is what I can help with:\n\
- **Check a booking:** _\"Check booking VX123456\"_\n\
- **Change departure time:** _\"I want to move booking VX123456 to 06/09\"_\n\
- **View trips:** _\"Show trips from HCM to Da Lat on 6/9\"_\n\
- **Cancel a booking:** _\"Cancel booking VX123456\"_\n\
- **Get an invoice:** _\"Invoice for VX123456\"_\n\
- **File a complaint:** _\"I want to complain about booking VX123456\"_\n\
- **Common questions:** _\"What is the refund policy?\"_";

pub const APOLOGY_REPLY: &str =
    "Sorry, something went wrong while handling your request. Please try again in a moment.";

pub fn fmt_vnd(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, digit) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{sign}{grouped} ₫")
}

pub fn fmt_datetime(value: &NaiveDateTime) -> String {
    value.format("%d/%m/%Y %H:%M").to_string()
}

pub fn fmt_date(value: &NaiveDate) -> String {
    value.format("%d/%m/%Y").to_string()
}

/// Reply for an id the engine could not resolve.
pub fn not_found_reply(error: &DomainError) -> String {
    match error {
        DomainError::BookingNotFound(id) => {
            format!("I could not find booking `{id}`. Please check the **booking id**.")
        }
        DomainError::TripNotFound(id) => {
            format!("I could not find trip `{id}`. Please check the **trip id**.")
        }
        _ => APOLOGY_REPLY.to_string(),
    }
}

fn record<T: Serialize>(state: &mut ConversationState, value: &T) {
    if let Ok(value) = serde_json::to_value(value) {
        state.record_result(value);
    }
}

fn join_missing(missing: &[&str]) -> String {
    missing.join(" and ")
}

pub fn extract(state: &ConversationState) -> Option<String> {
    let mut missing = Vec::new();
    if state.booking_id.is_none() {
        missing.push("**booking id** (e.g. `VX123456`)");
    }
    if state.date.is_none() {
        missing.push("**new travel date** (e.g. `2025-09-06`)");
    }
    if missing.is_empty() {
        return None;
    }
    Some(format!("Missing {}.\nPlease provide it so I can continue.", join_missing(&missing)))
}

fn trip_table(trips: &[Trip], with_price: bool) -> String {
    let mut rows = if with_price {
        vec![
            "| Trip | Departure | Seats left | Price |".to_string(),
            "|---|---:|---:|---:|".to_string(),
        ]
    } else {
        vec!["| Trip | Departure | Seats left |".to_string(), "|---|---:|---:|".to_string()]
    };
    for trip in trips {
        let departure = fmt_datetime(&trip.departure);
        let mut row = format!("| `{}` | {departure} | {} |", trip.id, trip.seats_available);
        if with_price {
            row.push_str(&format!(" {} |", fmt_vnd(trip.base_price)));
        }
        rows.push(row);
    }
    rows.join("\n")
}

pub async fn candidates<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
) -> Result<String, EngineError> {
    let (Some(booking_id), Some(date)) = (state.booking_id.clone(), state.date) else {
        return Ok(extract(state).unwrap_or_default());
    };

    let booking = engine.get_booking(&booking_id).await?;
    let trips = engine.available_trips(&booking.route, date).await?;
    let current_trip_id = engine.current_trip(&booking).await?.map(|trip| trip.id);

    record(
        state,
        &json!({
            "booking_id": booking_id,
            "date": date,
            "current_trip_id": current_trip_id,
            "candidates": trips,
        }),
    );

    if trips.is_empty() {
        return Ok(format!(
            "There are **no trips with free seats** on **{}**.\n\
             You can try another date (e.g. `2025-09-07`) or another time of day.",
            fmt_date(&date)
        ));
    }

    let mut header = format!("**Available trips on {}**", fmt_date(&date));
    if let Some(current) = &current_trip_id {
        header.push_str(&format!("\nYour booking is currently on trip `{current}`"));
    }
    Ok(format!(
        "{header}\n\n{}\n\nPlease reply with the **trip id** you want (e.g. `T001`).",
        trip_table(&trips, false)
    ))
}

pub async fn apply<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
    audit: &AuditContext,
) -> Result<String, EngineError> {
    let Some(trip_id) = state.trip_id.clone() else {
        return Ok("Please provide the **trip id** you want to move to (e.g. `T001`).".to_string());
    };
    let Some(booking_id) = state.booking_id.clone() else {
        return Ok(extract(state).unwrap_or_default());
    };

    let outcome = engine.apply_change(&booking_id, &trip_id, audit).await?;
    record(state, &outcome);

    let reply = match &outcome {
        ChangeOutcome::Applied(receipt) => {
            let mut lines = vec![
                "**Departure time changed**".to_string(),
                format!("- Booking: **{}**", receipt.booking_id),
                format!("- New departure: **{}**", fmt_datetime(&receipt.new_departure)),
                format!("- New trip: **{}**", receipt.new_trip_id),
            ];
            if let Some(old_trip) = &receipt.old_trip_id {
                lines.push(format!("- Previous trip: **{old_trip}**"));
            }
            lines.push(format!("- Change fee: **{}**", fmt_vnd(receipt.fee)));
            format!(
                "{}\n\nPlease check your **SMS/email** for the confirmation.",
                lines.join("\n")
            )
        }
        ChangeOutcome::Unchanged(receipt) => format!(
            "**No change needed**\n\
             - Booking: **{}**\n\
             - Current departure: **{}**\n\
             - Current trip: **{}**\n\
             - Fee: **{}**\n\n\
             Would you like to see **another time**?",
            receipt.booking_id,
            fmt_datetime(&receipt.new_departure),
            receipt.new_trip_id,
            fmt_vnd(0)
        ),
        ChangeOutcome::Rejected { reason } => {
            state.record_error(reason.code());
            change_rejection_reply(*reason, &trip_id.to_string())
        }
    };
    Ok(reply)
}

fn change_rejection_reply(reason: RejectionReason, trip_id: &str) -> String {
    match reason {
        RejectionReason::SeatsUnavailable => {
            format!("Trip `{trip_id}` is **sold out**. Please pick **another trip**.")
        }
        RejectionReason::RouteMismatch => format!(
            "Trip `{trip_id}` runs on a different route than your booking. \
             Please pick a trip from the list."
        ),
        RejectionReason::InvalidStatus | RejectionReason::NotCancellable => {
            "This booking is not in **PAID** status, so its departure cannot be changed."
                .to_string()
        }
        RejectionReason::PastCutoff => {
            "It is too close to departure to change this booking.".to_string()
        }
    }
}

pub async fn check_booking<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
) -> Result<String, EngineError> {
    let Some(booking_id) = state.booking_id.clone() else {
        return Ok(
            "Please provide your **booking id** so I can look it up (e.g. `VX123456`).".to_string()
        );
    };

    let booking = engine.get_booking(&booking_id).await?;
    let current_trip = engine.current_trip(&booking).await?;
    let trip_line = match &current_trip {
        Some(trip) => format!("`{}`", trip.id),
        None => "not found".to_string(),
    };

    let reply = format!(
        "**Current booking**\n\n\
         **Booking:** `{}`\n\
         **Route:** {}\n\
         **Departure:** {}\n\
         **Status:** {}\n\
         **Seat class:** {}\n\
         **Phone:** {}\n\
         **Trip:** {}\n\n\
         Would you like to **change the departure time** of this booking?",
        booking.id,
        booking.route,
        fmt_datetime(&booking.departure),
        booking.status,
        booking.seat_class,
        booking.contact_phone.as_deref().unwrap_or("not provided"),
        trip_line
    );
    record(
        state,
        &json!({ "booking": booking, "current_trip_id": current_trip.map(|trip| trip.id) }),
    );
    Ok(reply)
}

pub async fn view_trips<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
) -> Result<String, EngineError> {
    let mut missing = Vec::new();
    if state.route_from.is_none() {
        missing.push("**origin** (e.g. HCM)");
    }
    if state.route_to.is_none() {
        missing.push("**destination** (e.g. Da Lat)");
    }
    if state.date.is_none() {
        missing.push("**date** (e.g. 2025-09-06)");
    }
    let (Some(from), Some(to), Some(date)) =
        (state.route_from.clone(), state.route_to.clone(), state.date)
    else {
        return Ok(format!("Please provide the {} to list trips.", join_missing(&missing)));
    };

    let route = Route::new(from, to);
    let trips = engine.available_trips(&route, date).await?;
    record(state, &json!({ "route": route, "date": date, "trips": trips }));

    if trips.is_empty() {
        return Ok(format!(
            "**No trips available** for **{route}** on **{}**.",
            fmt_date(&date)
        ));
    }
    Ok(format!(
        "**Available trips on {}**\n\n**Route:** {route}\n\n{}\n\n\
         To move an existing booking, send its booking id and the trip id you want.",
        fmt_date(&date),
        trip_table(&trips, true)
    ))
}

pub async fn cancel_booking<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
    audit: &AuditContext,
) -> Result<String, EngineError> {
    let Some(booking_id) = state.booking_id.clone() else {
        return Ok("Please provide the **booking id** to cancel (e.g. `VX123456`).".to_string());
    };

    let outcome = engine.cancel_booking(&booking_id, audit).await?;
    record(state, &outcome);

    let reply = match outcome {
        CancellationOutcome::Cancelled(receipt) => format!(
            "**Booking cancelled**\n\n\
             **Booking:** {}\n\
             **Ticket price:** {}\n\
             **Change fees:** {}\n\
             **Total refund:** {}\n\
             **Note:** The refund goes back to your original payment method.",
            receipt.booking_id,
            fmt_vnd(receipt.base_price),
            fmt_vnd(receipt.change_fees),
            fmt_vnd(receipt.refund_amount)
        ),
        CancellationOutcome::Rejected { reason } => {
            state.record_error(reason.code());
            format!(
                "Booking `{booking_id}` cannot be cancelled because it is not in **PAID** status."
            )
        }
    };
    Ok(reply)
}

pub async fn get_invoice<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
) -> Result<String, EngineError> {
    let Some(booking_id) = state.booking_id.clone() else {
        return Ok(
            "Please provide the **booking id** for the invoice (e.g. `VX123456`).".to_string()
        );
    };

    let invoice = engine.get_invoice(&booking_id).await?;
    let price_note = if invoice.base_price_resolved { "" } else { " (standard fare)" };
    let reply = format!(
        "**Invoice**\n\n\
         **Booking:** {}\n\
         **Route:** {}\n\
         **Departure:** {}\n\
         **Seat class:** {}\n\
         **Status:** {}\n\n\
         **Ticket price:** {}{price_note}\n\
         **Change fees:** {}\n\
         **Total:** {}\n\n\
         **Issued:** {}",
        invoice.booking_id,
        invoice.route,
        fmt_datetime(&invoice.departure),
        invoice.seat_class,
        invoice.status,
        fmt_vnd(invoice.base_price),
        fmt_vnd(invoice.change_fees),
        fmt_vnd(invoice.total_amount),
        fmt_datetime(&invoice.issued_at)
    );
    record(state, &invoice);
    Ok(reply)
}

fn complaint_type_prompt() -> String {
    let options: Vec<String> = ComplaintType::ALL
        .iter()
        .map(|kind| format!("- **{}**: {}", kind.as_str(), kind.description()))
        .collect();
    format!("Please choose the **complaint type**:\n{}", options.join("\n"))
}

/// Prompts for one missing field at a time: booking id, then type, then description.
pub async fn create_complaint<S: ReservationStore>(
    engine: &ReservationEngine<S>,
    state: &mut ConversationState,
    audit: &AuditContext,
) -> Result<String, EngineError> {
    let Some(booking_id) = state.booking_id.clone() else {
        return Ok(
            "Please provide the **booking id** the complaint is about (e.g. `VX123456`)."
                .to_string(),
        );
    };
    let Some(complaint_type) = state.complaint_type else {
        return Ok(complaint_type_prompt());
    };
    let Some(description) = state.description.clone() else {
        return Ok("Please describe the **details of your complaint**.".to_string());
    };

    let complaint =
        engine.create_complaint(&booking_id, complaint_type, &description, audit).await?;
    let reply = format!(
        "**Complaint recorded**\n\n\
         **Complaint id:** #{}\n\
         **Booking:** {}\n\
         **Type:** {}\n\
         **Description:** {}\n\
         **Status:** {}\n\
         **Created:** {}\n\n\
         **Note:** Our support team will review it and get back to you.",
        complaint.id,
        complaint.booking_id,
        complaint.complaint_type,
        complaint.description,
        complaint.status.as_str(),
        fmt_datetime(&complaint.created_at)
    );
    record(state, &complaint);
    Ok(reply)
}

pub fn faq_reply(answer: &str) -> String {
    format!("**Frequently asked questions**\n\n{answer}")
}
