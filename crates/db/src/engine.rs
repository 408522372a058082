use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{info, warn};

use rebook_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use rebook_core::clock::Clock;
use rebook_core::domain::billing::{CancellationOutcome, CancellationReceipt, Invoice};
use rebook_core::domain::booking::{format_departure, Booking, BookingId, BookingStatus, Route};
use rebook_core::domain::change::{
    BookingChange, ChangeOutcome, ChangeQuote, ChangeReceipt, NewBookingChange, RejectionReason,
};
use rebook_core::domain::complaint::{Complaint, ComplaintType, NewComplaint};
use rebook_core::domain::trip::{Trip, TripId};
use rebook_core::errors::{ApplicationError, DomainError};
use rebook_core::fees::BookingPolicy;

use crate::repositories::{RepositoryError, ReservationStore};

const MAX_CONTENTION_ATTEMPTS: u32 = 3;
const CONTENTION_BACKOFF_MS: u64 = 25;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    NotFound(#[from] DomainError),
    #[error("reservation invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(error) if error.is_not_found())
    }
}

impl From<EngineError> for ApplicationError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::NotFound(domain) => Self::Domain(domain),
            EngineError::Invariant(message) => {
                Self::Domain(DomainError::InvariantViolation(message))
            }
            EngineError::Repository(repository) => Self::Persistence(repository.to_string()),
        }
    }
}

/// Booking operations over a [`ReservationStore`].
///
/// Mutations run in one store transaction each and are retried from scratch when the
/// store reports write contention. Business refusals come back as `Rejected` outcomes.
pub struct ReservationEngine<S> {
    store: S,
    policy: BookingPolicy,
    clock: Arc<dyn Clock>,
    audit_sink: Arc<dyn AuditSink>,
}

impl<S> ReservationEngine<S>
where
    S: ReservationStore,
{
    pub fn new(store: S, policy: BookingPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { store, policy, clock, audit_sink: Arc::new(NoopAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub async fn get_booking(&self, booking_id: &BookingId) -> Result<Booking, EngineError> {
        self.store
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| DomainError::BookingNotFound(booking_id.clone()).into())
    }

    pub async fn get_trip(&self, trip_id: &TripId) -> Result<Trip, EngineError> {
        self.store
            .find_trip(trip_id)
            .await?
            .ok_or_else(|| DomainError::TripNotFound(trip_id.clone()).into())
    }

    /// The trip with the booking's route and exact departure, if one exists.
    pub async fn current_trip(&self, booking: &Booking) -> Result<Option<Trip>, EngineError> {
        Ok(self.store.find_trip_at(&booking.route, &booking.departure).await?)
    }

    pub async fn candidates(
        &self,
        booking_id: &BookingId,
        date: NaiveDate,
    ) -> Result<Vec<Trip>, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        self.available_trips(&booking.route, date).await
    }

    pub async fn available_trips(
        &self,
        route: &Route,
        date: NaiveDate,
    ) -> Result<Vec<Trip>, EngineError> {
        Ok(self.store.list_open_trips(route, date).await?)
    }

    pub async fn change_history(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingChange>, EngineError> {
        self.get_booking(booking_id).await?;
        Ok(self.store.list_changes(booking_id).await?)
    }

    pub async fn quote_change(
        &self,
        booking_id: &BookingId,
        target: NaiveDateTime,
    ) -> Result<ChangeQuote, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        Ok(self.policy.quote_change(&booking, target, self.clock.now()))
    }

    /// Moves a booking onto `trip_id`.
    ///
    /// Re-selecting the trip the booking already departs on is `Unchanged`: no seat moves
    /// and no change row is written. The cutoff applies to quotes only.
    pub async fn apply_change(
        &self,
        booking_id: &BookingId,
        trip_id: &TripId,
        audit: &AuditContext,
    ) -> Result<ChangeOutcome, EngineError> {
        let outcome = self
            .with_contention_retry("apply_change", || self.try_apply_change(booking_id, trip_id))
            .await?;

        let context = audit.clone().with_booking(booking_id.clone());
        match &outcome {
            ChangeOutcome::Applied(receipt) => {
                info!(
                    event_name = "reservation.change_applied",
                    correlation_id = %context.correlation_id,
                    booking_id = %receipt.booking_id,
                    new_trip_id = %receipt.new_trip_id,
                    fee = receipt.fee,
                    "booking moved to new trip"
                );
                self.audit_sink
                    .emit(receipt_event(&context, "reservation.change_applied", receipt));
            }
            ChangeOutcome::Unchanged(receipt) => {
                info!(
                    event_name = "reservation.change_noop",
                    correlation_id = %context.correlation_id,
                    booking_id = %receipt.booking_id,
                    trip_id = %receipt.new_trip_id,
                    "booking already on requested trip"
                );
                self.audit_sink.emit(receipt_event(&context, "reservation.change_noop", receipt));
            }
            ChangeOutcome::Rejected { reason } => {
                info!(
                    event_name = "reservation.change_rejected",
                    correlation_id = %context.correlation_id,
                    booking_id = %booking_id,
                    trip_id = %trip_id,
                    reason = reason.code(),
                    "change rejected"
                );
                self.audit_sink.emit(
                    AuditEvent::from_context(
                        &context,
                        "reservation.change_rejected",
                        AuditCategory::Reservation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("trip_id", trip_id.as_str())
                    .with_metadata("reason", reason.code()),
                );
            }
        }

        Ok(outcome)
    }

    async fn try_apply_change(
        &self,
        booking_id: &BookingId,
        trip_id: &TripId,
    ) -> Result<ChangeOutcome, EngineError> {
        let mut tx = self.store.begin().await?;

        let booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| DomainError::BookingNotFound(booking_id.clone()))?;
        let target =
            tx.find_trip(trip_id).await?.ok_or_else(|| DomainError::TripNotFound(trip_id.clone()))?;

        if !booking.is_paid() {
            return Ok(ChangeOutcome::Rejected { reason: RejectionReason::InvalidStatus });
        }
        if target.route != booking.route {
            return Ok(ChangeOutcome::Rejected { reason: RejectionReason::RouteMismatch });
        }

        let current = tx.find_trip_at(&booking.route, &booking.departure).await?;

        if target.departure == booking.departure {
            return Ok(ChangeOutcome::Unchanged(ChangeReceipt {
                booking_id: booking.id,
                old_departure: booking.departure,
                new_departure: target.departure,
                fee: 0,
                old_trip_id: current.map(|trip| trip.id),
                new_trip_id: target.id,
            }));
        }

        if !target.has_free_seat() {
            return Ok(ChangeOutcome::Rejected { reason: RejectionReason::SeatsUnavailable });
        }

        if let Some(current) = &current {
            if !tx.adjust_seats(&current.id, 1).await? {
                return Err(EngineError::Invariant(format!(
                    "trip {} has no booked seat to release",
                    current.id
                )));
            }
        }

        // Another writer may have taken the last seat since the read above.
        if !tx.adjust_seats(&target.id, -1).await? {
            return Ok(ChangeOutcome::Rejected { reason: RejectionReason::SeatsUnavailable });
        }

        let fee = self.policy.change_fee(&booking.departure, &target.departure);
        tx.update_booking_departure(&booking.id, &target.departure).await?;
        tx.record_change(NewBookingChange {
            booking_id: booking.id.clone(),
            old_departure: booking.departure,
            new_departure: target.departure,
            fee,
        })
        .await?;
        tx.commit().await?;

        Ok(ChangeOutcome::Applied(ChangeReceipt {
            booking_id: booking.id,
            old_departure: booking.departure,
            new_departure: target.departure,
            fee,
            old_trip_id: current.map(|trip| trip.id),
            new_trip_id: target.id,
        }))
    }

    pub async fn cancel_booking(
        &self,
        booking_id: &BookingId,
        audit: &AuditContext,
    ) -> Result<CancellationOutcome, EngineError> {
        let outcome = self
            .with_contention_retry("cancel_booking", || self.try_cancel_booking(booking_id))
            .await?;

        let context = audit.clone().with_booking(booking_id.clone());
        match &outcome {
            CancellationOutcome::Cancelled(receipt) => {
                info!(
                    event_name = "reservation.cancelled",
                    correlation_id = %context.correlation_id,
                    booking_id = %receipt.booking_id,
                    refund_amount = receipt.refund_amount,
                    "booking cancelled"
                );
                self.audit_sink.emit(
                    AuditEvent::from_context(
                        &context,
                        "reservation.cancelled",
                        AuditCategory::Reservation,
                        AuditOutcome::Success,
                    )
                    .with_metadata(
                        "released_trip_id",
                        receipt.released_trip_id.as_ref().map(TripId::as_str).unwrap_or("none"),
                    )
                    .with_metadata("refund_amount", receipt.refund_amount.to_string()),
                );
            }
            CancellationOutcome::Rejected { reason } => {
                info!(
                    event_name = "reservation.cancel_rejected",
                    correlation_id = %context.correlation_id,
                    booking_id = %booking_id,
                    reason = reason.code(),
                    "cancellation rejected"
                );
                self.audit_sink.emit(
                    AuditEvent::from_context(
                        &context,
                        "reservation.cancelled",
                        AuditCategory::Reservation,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("reason", reason.code()),
                );
            }
        }

        Ok(outcome)
    }

    async fn try_cancel_booking(
        &self,
        booking_id: &BookingId,
    ) -> Result<CancellationOutcome, EngineError> {
        let mut tx = self.store.begin().await?;

        let booking = tx
            .find_booking(booking_id)
            .await?
            .ok_or_else(|| DomainError::BookingNotFound(booking_id.clone()))?;
        if !booking.is_paid() {
            return Ok(CancellationOutcome::Rejected { reason: RejectionReason::NotCancellable });
        }

        let current = tx.find_trip_at(&booking.route, &booking.departure).await?;
        if let Some(trip) = &current {
            if !tx.adjust_seats(&trip.id, 1).await? {
                return Err(EngineError::Invariant(format!(
                    "trip {} has no booked seat to release",
                    trip.id
                )));
            }
        }

        tx.update_booking_status(&booking.id, BookingStatus::Cancelled).await?;
        let change_fees = tx.total_change_fees(&booking.id).await?;
        tx.commit().await?;

        let base_price =
            current.as_ref().map(|trip| trip.base_price).unwrap_or(self.policy.fallback_base_price);
        Ok(CancellationOutcome::Cancelled(CancellationReceipt {
            booking_id: booking.id,
            released_trip_id: current.map(|trip| trip.id),
            base_price,
            change_fees,
            refund_amount: self.policy.refund_amount(base_price, change_fees),
        }))
    }

    pub async fn get_invoice(&self, booking_id: &BookingId) -> Result<Invoice, EngineError> {
        let booking = self.get_booking(booking_id).await?;
        let current = self.current_trip(&booking).await?;
        let change_fees = self.store.total_change_fees(&booking.id).await?;

        let (base_price, base_price_resolved) = match current {
            Some(trip) => (trip.base_price, true),
            None => (self.policy.fallback_base_price, false),
        };

        Ok(Invoice {
            booking_id: booking.id,
            route: booking.route,
            departure: booking.departure,
            seat_class: booking.seat_class,
            status: booking.status,
            base_price,
            base_price_resolved,
            change_fees,
            total_amount: base_price + change_fees,
            issued_at: self.clock.now(),
        })
    }

    pub async fn create_complaint(
        &self,
        booking_id: &BookingId,
        complaint_type: ComplaintType,
        description: &str,
        audit: &AuditContext,
    ) -> Result<Complaint, EngineError> {
        self.get_booking(booking_id).await?;

        let complaint = self
            .with_contention_retry("create_complaint", || async {
                self.store
                    .create_complaint(NewComplaint {
                        booking_id: booking_id.clone(),
                        complaint_type,
                        description: description.trim().to_string(),
                        created_at: self.clock.now(),
                    })
                    .await
                    .map_err(EngineError::from)
            })
            .await?;

        let context = audit.clone().with_booking(booking_id.clone());
        info!(
            event_name = "complaint.created",
            correlation_id = %context.correlation_id,
            booking_id = %booking_id,
            complaint_id = %complaint.id,
            complaint_type = complaint.complaint_type.as_str(),
            "complaint recorded"
        );
        self.audit_sink.emit(
            AuditEvent::from_context(
                &context,
                "complaint.created",
                AuditCategory::Complaint,
                AuditOutcome::Success,
            )
            .with_metadata("complaint_id", complaint.id.to_string())
            .with_metadata("complaint_type", complaint.complaint_type.as_str()),
        );

        Ok(complaint)
    }

    async fn with_contention_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt_once: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_once().await {
                Err(EngineError::Repository(error))
                    if error.is_contention() && attempt < MAX_CONTENTION_ATTEMPTS =>
                {
                    warn!(
                        event_name = "reservation.contention_retry",
                        operation,
                        attempt,
                        error = %error,
                        "store busy, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(
                        CONTENTION_BACKOFF_MS * u64::from(attempt),
                    ))
                    .await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

fn receipt_event(context: &AuditContext, event_type: &str, receipt: &ChangeReceipt) -> AuditEvent {
    AuditEvent::from_context(context, event_type, AuditCategory::Reservation, AuditOutcome::Success)
        .with_metadata(
            "old_trip_id",
            receipt.old_trip_id.as_ref().map(TripId::as_str).unwrap_or("none"),
        )
        .with_metadata("new_trip_id", receipt.new_trip_id.as_str())
        .with_metadata("old_departure", format_departure(&receipt.old_departure))
        .with_metadata("new_departure", format_departure(&receipt.new_departure))
        .with_metadata("fee", receipt.fee.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime};

    use rebook_core::audit::{AuditContext, InMemoryAuditSink};
    use rebook_core::clock::FixedClock;
    use rebook_core::domain::billing::CancellationOutcome;
    use rebook_core::domain::booking::{Booking, BookingId, BookingStatus, Route};
    use rebook_core::domain::change::{
        BookingChange, ChangeOutcome, ChangeQuote, NewBookingChange, RejectionReason,
    };
    use rebook_core::domain::complaint::{
        Complaint, ComplaintId, ComplaintStatus, ComplaintType, NewComplaint,
    };
    use rebook_core::domain::trip::{Trip, TripId};
    use rebook_core::fees::BookingPolicy;

    use super::{EngineError, ReservationEngine};
    use crate::fixtures::ReservationSeedDataset;
    use crate::repositories::{
        InMemoryReservationStore, RepositoryError, ReservationStore, ReservationTransaction,
        SqlReservationStore,
    };
    use crate::{connect_with_settings, migrations};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 9, day)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .expect("valid datetime")
    }

    fn reference_now() -> NaiveDateTime {
        at(2, 9)
    }

    fn context() -> AuditContext {
        AuditContext::new(None, Some("thread-1".to_string()), "req-1", "test")
    }

    async fn seeded_engine(
        now: NaiveDateTime,
    ) -> (ReservationEngine<SqlReservationStore>, Arc<InMemoryAuditSink>) {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        ReservationSeedDataset::load(&pool).await.expect("seed");

        let sink = Arc::new(InMemoryAuditSink::default());
        let engine = ReservationEngine::new(
            SqlReservationStore::new(pool),
            BookingPolicy::default(),
            Arc::new(FixedClock(now)),
        )
        .with_audit_sink(sink.clone());
        (engine, sink)
    }

    async fn seats(engine: &ReservationEngine<SqlReservationStore>, trip_id: &str) -> i64 {
        engine.get_trip(&TripId::from(trip_id)).await.expect("trip exists").seats_available
    }

    async fn total_seats(engine: &ReservationEngine<SqlReservationStore>) -> i64 {
        sqlx::query_scalar("SELECT SUM(seats_available) FROM trips")
            .fetch_one(engine.store().pool())
            .await
            .expect("sum seats")
    }

    #[tokio::test]
    async fn applying_change_moves_seat_and_charges_different_day_fee() {
        let (engine, sink) = seeded_engine(reference_now()).await;
        let booking_id = BookingId::from("VX123456");
        let seats_before = total_seats(&engine).await;

        let outcome = engine
            .apply_change(&booking_id, &TripId::from("T001"), &context())
            .await
            .expect("apply change");

        let ChangeOutcome::Applied(receipt) = outcome else {
            panic!("expected applied change, got {outcome:?}");
        };
        assert_eq!(receipt.new_departure, at(6, 8));
        assert_eq!(receipt.fee, 100_000);
        assert_eq!(receipt.old_trip_id, Some(TripId::from("T003")));

        assert_eq!(seats(&engine, "T001").await, 4);
        assert_eq!(seats(&engine, "T003").await, 2);
        assert_eq!(total_seats(&engine).await, seats_before);

        let booking = engine.get_booking(&booking_id).await.expect("booking");
        assert_eq!(booking.departure, at(6, 8));
        let history = engine.change_history(&booking_id).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_departure, at(5, 20));

        let events = sink.events_of_type("reservation.change_applied");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].booking_id, Some(booking_id));
        assert_eq!(events[0].metadata.get("fee").map(String::as_str), Some("100000"));
    }

    #[tokio::test]
    async fn reselecting_current_trip_is_a_no_op_every_time() {
        let (engine, sink) = seeded_engine(reference_now()).await;
        let booking_id = BookingId::from("VX123456");

        let first = engine
            .apply_change(&booking_id, &TripId::from("T003"), &context())
            .await
            .expect("first apply");
        let second = engine
            .apply_change(&booking_id, &TripId::from("T003"), &context())
            .await
            .expect("second apply");

        assert!(first.is_no_op());
        assert_eq!(first, second);
        assert_eq!(first.receipt().map(|receipt| receipt.fee), Some(0));
        assert_eq!(seats(&engine, "T003").await, 1);
        assert!(engine.change_history(&booking_id).await.expect("history").is_empty());
        assert_eq!(sink.events_of_type("reservation.change_noop").len(), 2);
    }

    #[tokio::test]
    async fn same_day_change_charges_lower_fee() {
        let (engine, _) = seeded_engine(reference_now()).await;

        let outcome = engine
            .apply_change(&BookingId::from("VX789012"), &TripId::from("T102"), &context())
            .await
            .expect("apply change");

        assert_eq!(outcome.receipt().map(|receipt| receipt.fee), Some(50_000));
        assert_eq!(seats(&engine, "T101").await, 3);
        assert_eq!(seats(&engine, "T102").await, 4);
    }

    #[tokio::test]
    async fn sold_out_target_is_rejected_without_writes() {
        let (engine, sink) = seeded_engine(reference_now()).await;
        let booking_id = BookingId::from("VX123456");

        let outcome = engine
            .apply_change(&booking_id, &TripId::from("T004"), &context())
            .await
            .expect("apply change");

        assert_eq!(outcome, ChangeOutcome::Rejected { reason: RejectionReason::SeatsUnavailable });
        assert_eq!(seats(&engine, "T003").await, 1);
        assert_eq!(seats(&engine, "T004").await, 0);
        let booking = engine.get_booking(&booking_id).await.expect("booking");
        assert_eq!(booking.departure, at(5, 20));
        assert_eq!(sink.events_of_type("reservation.change_rejected").len(), 1);
    }

    /// Free seats plus seats held by live bookings that resolve to a trip.
    async fn seat_ledger(engine: &ReservationEngine<SqlReservationStore>) -> i64 {
        let held: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings b
             JOIN trips t ON t.route_from = b.route_from
                 AND t.route_to = b.route_to
                 AND t.depart_time = b.depart_time
             WHERE b.status <> 'CANCELLED'",
        )
        .fetch_one(engine.store().pool())
        .await
        .expect("count held seats");
        total_seats(engine).await + held
    }

    async fn out_of_bounds_trips(engine: &ReservationEngine<SqlReservationStore>) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM trips WHERE seats_available < 0 OR seats_available > seats_total",
        )
        .fetch_one(engine.store().pool())
        .await
        .expect("count out of bounds trips")
    }

    #[tokio::test]
    async fn seats_are_conserved_across_a_mixed_sequence() {
        let (engine, _) = seeded_engine(reference_now()).await;
        let booking_id = BookingId::from("VX123456");
        let ledger = seat_ledger(&engine).await;
        assert_eq!(out_of_bounds_trips(&engine).await, 0);

        let applied = engine
            .apply_change(&booking_id, &TripId::from("T001"), &context())
            .await
            .expect("apply change");
        assert!(matches!(applied, ChangeOutcome::Applied(_)));
        assert_eq!(seat_ledger(&engine).await, ledger);
        assert_eq!(out_of_bounds_trips(&engine).await, 0);

        let repeated = engine
            .apply_change(&booking_id, &TripId::from("T001"), &context())
            .await
            .expect("repeat change");
        assert!(repeated.is_no_op());
        assert_eq!(seat_ledger(&engine).await, ledger);
        assert_eq!(out_of_bounds_trips(&engine).await, 0);

        let sold_out = engine
            .apply_change(&booking_id, &TripId::from("T004"), &context())
            .await
            .expect("sold out change");
        assert_eq!(
            sold_out,
            ChangeOutcome::Rejected { reason: RejectionReason::SeatsUnavailable }
        );
        assert_eq!(seat_ledger(&engine).await, ledger);
        assert_eq!(out_of_bounds_trips(&engine).await, 0);

        let cancelled = engine.cancel_booking(&booking_id, &context()).await.expect("cancel");
        assert!(matches!(cancelled, CancellationOutcome::Cancelled(_)));
        assert_eq!(seat_ledger(&engine).await, ledger);
        assert_eq!(out_of_bounds_trips(&engine).await, 0);
        assert_eq!(seats(&engine, "T001").await, 5);
    }

    #[tokio::test]
    async fn change_refusals_are_structured() {
        let (engine, _) = seeded_engine(reference_now()).await;

        let other_route = engine
            .apply_change(&BookingId::from("VX123456"), &TripId::from("T101"), &context())
            .await
            .expect("apply change");
        assert_eq!(other_route, ChangeOutcome::Rejected { reason: RejectionReason::RouteMismatch });

        let cancelled = engine
            .apply_change(&BookingId::from("VX901234"), &TripId::from("T301"), &context())
            .await
            .expect("apply change");
        assert_eq!(cancelled, ChangeOutcome::Rejected { reason: RejectionReason::InvalidStatus });
    }

    #[tokio::test]
    async fn unknown_booking_or_trip_is_not_found() {
        let (engine, _) = seeded_engine(reference_now()).await;

        let missing_booking = engine
            .apply_change(&BookingId::from("VX000000"), &TripId::from("T001"), &context())
            .await
            .expect_err("booking is unknown");
        assert!(missing_booking.is_not_found());

        let missing_trip = engine
            .apply_change(&BookingId::from("VX123456"), &TripId::from("T999"), &context())
            .await
            .expect_err("trip is unknown");
        assert!(missing_trip.is_not_found());

        let invoice = engine.get_invoice(&BookingId::from("VX000000")).await;
        assert!(matches!(invoice, Err(ref error) if error.is_not_found()));
    }

    #[tokio::test]
    async fn quote_applies_fee_tiers_and_cutoff() {
        let (engine, _) = seeded_engine(reference_now()).await;
        let booking_id = BookingId::from("VX123456");

        let quote = engine.quote_change(&booking_id, at(6, 8)).await.expect("quote");
        assert_eq!(quote, ChangeQuote::Allowed { fee: 100_000, new_departure: at(6, 8) });

        let same_day = engine.quote_change(&booking_id, at(5, 22)).await.expect("quote");
        assert_eq!(same_day.fee(), 50_000);

        let cancelled =
            engine.quote_change(&BookingId::from("VX901234"), at(9, 8)).await.expect("quote");
        assert_eq!(cancelled, ChangeQuote::NotAllowed { reason: RejectionReason::InvalidStatus });

        let late_now = NaiveDate::from_ymd_opt(2025, 9, 5)
            .and_then(|date| date.and_hms_opt(18, 30, 0))
            .expect("valid datetime");
        let (late_engine, _) = seeded_engine(late_now).await;
        let late = late_engine.quote_change(&booking_id, at(6, 8)).await.expect("quote");
        assert_eq!(late, ChangeQuote::NotAllowed { reason: RejectionReason::PastCutoff });
    }

    #[tokio::test]
    async fn cancelling_refunds_base_price_plus_change_fees() {
        let (engine, sink) = seeded_engine(reference_now()).await;
        let booking_id = BookingId::from("VX123456");

        engine
            .apply_change(&booking_id, &TripId::from("T001"), &context())
            .await
            .expect("apply change");
        let outcome = engine.cancel_booking(&booking_id, &context()).await.expect("cancel");

        let CancellationOutcome::Cancelled(receipt) = outcome else {
            panic!("expected cancellation, got {outcome:?}");
        };
        assert_eq!(receipt.base_price, 250_000);
        assert_eq!(receipt.change_fees, 100_000);
        assert_eq!(receipt.refund_amount, 350_000);
        assert_eq!(receipt.released_trip_id, Some(TripId::from("T001")));
        assert_eq!(seats(&engine, "T001").await, 5);

        let booking = engine.get_booking(&booking_id).await.expect("booking");
        assert_eq!(booking.status, BookingStatus::Cancelled);

        let again = engine.cancel_booking(&booking_id, &context()).await.expect("cancel again");
        assert_eq!(
            again,
            CancellationOutcome::Rejected { reason: RejectionReason::NotCancellable }
        );
        assert_eq!(seats(&engine, "T001").await, 5);
        assert_eq!(sink.events_of_type("reservation.cancelled").len(), 2);
    }

    #[tokio::test]
    async fn invoice_falls_back_when_current_trip_is_unresolvable() {
        let (engine, _) = seeded_engine(reference_now()).await;

        let resolved = engine.get_invoice(&BookingId::from("VX123456")).await.expect("invoice");
        assert!(resolved.base_price_resolved);
        assert_eq!(resolved.total_amount, 250_000);
        assert_eq!(resolved.issued_at, reference_now());

        let cancelled = engine.get_invoice(&BookingId::from("VX901234")).await.expect("invoice");
        assert_eq!(cancelled.base_price, 200_000);
        assert_eq!(cancelled.status, BookingStatus::Cancelled);

        sqlx::query(
            "INSERT INTO bookings
                 (booking_id, route_from, route_to, depart_time, status, seat_class)
             VALUES ('VX555555', 'HCM', 'Hue', '2025-09-10T07:00:00', 'PAID', 'Standard')",
        )
        .execute(engine.store().pool())
        .await
        .expect("insert unmatched booking");
        let fallback = engine.get_invoice(&BookingId::from("VX555555")).await.expect("invoice");
        assert!(!fallback.base_price_resolved);
        assert_eq!(fallback.base_price, BookingPolicy::default().fallback_base_price);
        assert_eq!(fallback.total_amount, 250_000);
    }

    #[tokio::test]
    async fn candidates_follow_booking_route_and_date() {
        let (engine, _) = seeded_engine(reference_now()).await;
        let date = NaiveDate::from_ymd_opt(2025, 9, 6).expect("valid date");

        let trips = engine.candidates(&BookingId::from("VX123456"), date).await.expect("list");
        let ids: Vec<&str> = trips.iter().map(|trip| trip.id.as_str()).collect();
        assert_eq!(ids, vec!["T001", "T002"]);

        let missing = engine.candidates(&BookingId::from("VX000000"), date).await;
        assert!(matches!(missing, Err(ref error) if error.is_not_found()));
    }

    #[tokio::test]
    async fn complaint_is_recorded_as_pending() {
        let (engine, sink) = seeded_engine(reference_now()).await;

        let complaint = engine
            .create_complaint(
                &BookingId::from("VX345678"),
                ComplaintType::Service,
                "  Bus left without me  ",
                &context(),
            )
            .await
            .expect("create complaint");

        assert_eq!(complaint.status, ComplaintStatus::Pending);
        assert_eq!(complaint.description, "Bus left without me");
        assert_eq!(complaint.created_at, reference_now());
        assert_eq!(sink.events_of_type("complaint.created").len(), 1);

        let missing = engine
            .create_complaint(&BookingId::from("VX000000"), ComplaintType::Other, "x", &context())
            .await
            .expect_err("booking is unknown");
        assert!(missing.is_not_found());
    }

    /// Wraps the in-memory store with injectable faults.
    struct FaultyStore {
        inner: InMemoryReservationStore,
        contention_failures: AtomicUsize,
        fail_record_change: bool,
    }

    struct FaultyTransaction {
        inner: Box<dyn ReservationTransaction>,
        fail_record_change: bool,
    }

    #[async_trait]
    impl ReservationStore for FaultyStore {
        async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
            self.inner.find_booking(id).await
        }

        async fn find_trip(&self, id: &TripId) -> Result<Option<Trip>, RepositoryError> {
            self.inner.find_trip(id).await
        }

        async fn find_trip_at(
            &self,
            route: &Route,
            departure: &NaiveDateTime,
        ) -> Result<Option<Trip>, RepositoryError> {
            self.inner.find_trip_at(route, departure).await
        }

        async fn list_open_trips(
            &self,
            route: &Route,
            date: NaiveDate,
        ) -> Result<Vec<Trip>, RepositoryError> {
            self.inner.list_open_trips(route, date).await
        }

        async fn total_change_fees(&self, booking_id: &BookingId) -> Result<i64, RepositoryError> {
            self.inner.total_change_fees(booking_id).await
        }

        async fn list_changes(
            &self,
            booking_id: &BookingId,
        ) -> Result<Vec<BookingChange>, RepositoryError> {
            self.inner.list_changes(booking_id).await
        }

        async fn create_complaint(
            &self,
            complaint: NewComplaint,
        ) -> Result<Complaint, RepositoryError> {
            self.inner.create_complaint(complaint).await
        }

        async fn get_complaint(
            &self,
            id: ComplaintId,
        ) -> Result<Option<Complaint>, RepositoryError> {
            self.inner.get_complaint(id).await
        }

        async fn begin(&self) -> Result<Box<dyn ReservationTransaction>, RepositoryError> {
            let remaining = self.contention_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.contention_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RepositoryError::Contention("database is locked".to_string()));
            }
            Ok(Box::new(FaultyTransaction {
                inner: self.inner.begin().await?,
                fail_record_change: self.fail_record_change,
            }))
        }
    }

    #[async_trait]
    impl ReservationTransaction for FaultyTransaction {
        async fn find_booking(
            &mut self,
            id: &BookingId,
        ) -> Result<Option<Booking>, RepositoryError> {
            self.inner.find_booking(id).await
        }

        async fn find_trip(&mut self, id: &TripId) -> Result<Option<Trip>, RepositoryError> {
            self.inner.find_trip(id).await
        }

        async fn find_trip_at(
            &mut self,
            route: &Route,
            departure: &NaiveDateTime,
        ) -> Result<Option<Trip>, RepositoryError> {
            self.inner.find_trip_at(route, departure).await
        }

        async fn adjust_seats(
            &mut self,
            trip_id: &TripId,
            delta: i64,
        ) -> Result<bool, RepositoryError> {
            self.inner.adjust_seats(trip_id, delta).await
        }

        async fn update_booking_departure(
            &mut self,
            id: &BookingId,
            departure: &NaiveDateTime,
        ) -> Result<(), RepositoryError> {
            self.inner.update_booking_departure(id, departure).await
        }

        async fn update_booking_status(
            &mut self,
            id: &BookingId,
            status: BookingStatus,
        ) -> Result<(), RepositoryError> {
            self.inner.update_booking_status(id, status).await
        }

        async fn record_change(
            &mut self,
            change: NewBookingChange,
        ) -> Result<BookingChange, RepositoryError> {
            if self.fail_record_change {
                return Err(RepositoryError::Decode("injected fault".to_string()));
            }
            self.inner.record_change(change).await
        }

        async fn total_change_fees(
            &mut self,
            booking_id: &BookingId,
        ) -> Result<i64, RepositoryError> {
            self.inner.total_change_fees(booking_id).await
        }

        async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
            self.inner.commit().await
        }
    }

    async fn small_store(target_seats: i64) -> InMemoryReservationStore {
        let store = InMemoryReservationStore::new();
        let route = Route::new("HCM", "Da Lat");
        store
            .insert_trip(Trip {
                id: TripId::from("T003"),
                route: route.clone(),
                departure: at(5, 20),
                seats_total: 40,
                seats_available: 1,
                base_price: 250_000,
            })
            .await;
        store
            .insert_trip(Trip {
                id: TripId::from("T001"),
                route: route.clone(),
                departure: at(6, 8),
                seats_total: 40,
                seats_available: target_seats,
                base_price: 250_000,
            })
            .await;
        for index in 0..5 {
            store
                .insert_booking(Booking {
                    id: BookingId(format!("VX10000{index}")),
                    route: route.clone(),
                    departure: at(5, 20),
                    status: BookingStatus::Paid,
                    seat_class: "Standard".to_string(),
                    contact_phone: None,
                })
                .await;
        }
        store
    }

    fn engine_over<S: ReservationStore>(store: S) -> ReservationEngine<S> {
        let clock = Arc::new(FixedClock(reference_now()));
        ReservationEngine::new(store, BookingPolicy::default(), clock)
    }

    #[tokio::test]
    async fn fault_mid_change_leaves_seats_and_departure_untouched() {
        let inner = small_store(5).await;
        let engine = engine_over(FaultyStore {
            inner: inner.clone(),
            contention_failures: AtomicUsize::new(0),
            fail_record_change: true,
        });
        let booking_id = BookingId::from("VX100000");

        let error = engine
            .apply_change(&booking_id, &TripId::from("T001"), &context())
            .await
            .expect_err("record_change fails");
        assert!(matches!(error, EngineError::Repository(RepositoryError::Decode(_))));

        let old_trip = inner.find_trip(&TripId::from("T003")).await.expect("query").expect("trip");
        let new_trip = inner.find_trip(&TripId::from("T001")).await.expect("query").expect("trip");
        assert_eq!(old_trip.seats_available, 1);
        assert_eq!(new_trip.seats_available, 5);
        let booking = inner.find_booking(&booking_id).await.expect("query").expect("booking");
        assert_eq!(booking.departure, at(5, 20));
    }

    #[tokio::test]
    async fn contention_is_retried_then_surfaced() {
        let recovering = engine_over(FaultyStore {
            inner: small_store(5).await,
            contention_failures: AtomicUsize::new(2),
            fail_record_change: false,
        });
        let outcome = recovering
            .apply_change(&BookingId::from("VX100000"), &TripId::from("T001"), &context())
            .await
            .expect("third attempt succeeds");
        assert!(matches!(outcome, ChangeOutcome::Applied(_)));

        let exhausted = engine_over(FaultyStore {
            inner: small_store(5).await,
            contention_failures: AtomicUsize::new(10),
            fail_record_change: false,
        });
        let error = exhausted
            .apply_change(&BookingId::from("VX100000"), &TripId::from("T001"), &context())
            .await
            .expect_err("retries exhausted");
        assert!(matches!(error, EngineError::Repository(ref inner) if inner.is_contention()));
    }

    #[tokio::test]
    async fn concurrent_changes_never_oversell_a_trip() {
        let store = small_store(2).await;
        let engine = Arc::new(engine_over(store.clone()));

        let mut handles = Vec::new();
        for index in 0..5 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine
                    .apply_change(
                        &BookingId(format!("VX10000{index}")),
                        &TripId::from("T001"),
                        &AuditContext::system("test"),
                    )
                    .await
            }));
        }

        let mut applied = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.expect("task joins").expect("change completes") {
                ChangeOutcome::Applied(_) => applied += 1,
                ChangeOutcome::Rejected { reason: RejectionReason::SeatsUnavailable } => {
                    sold_out += 1
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(applied, 2);
        assert_eq!(sold_out, 3);
        let target = store.find_trip(&TripId::from("T001")).await.expect("query").expect("trip");
        let released = store.find_trip(&TripId::from("T003")).await.expect("query").expect("trip");
        assert_eq!(target.seats_available, 0);
        assert_eq!(released.seats_available, 3);
    }
}
