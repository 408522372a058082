use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use rebook_core::domain::booking::{Booking, BookingId, BookingStatus, Route};
use rebook_core::domain::change::{BookingChange, NewBookingChange};
use rebook_core::domain::complaint::{Complaint, ComplaintId, NewComplaint};
use rebook_core::domain::trip::{Trip, TripId};

pub mod memory;
pub mod reservation;

pub use memory::InMemoryReservationStore;
pub use reservation::SqlReservationStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// Another writer held the database; the whole operation may be retried.
    #[error("write contention: {0}")]
    Contention(String),
}

impl RepositoryError {
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

/// Durable bookings, trips, change history and complaints.
///
/// Reads here run outside any transaction. Multi-row mutations go through
/// [`ReservationStore::begin`].
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;

    async fn find_trip(&self, id: &TripId) -> Result<Option<Trip>, RepositoryError>;

    /// The trip on `route` departing exactly at `departure`, if any. This is how a
    /// booking's current trip is resolved.
    async fn find_trip_at(
        &self,
        route: &Route,
        departure: &NaiveDateTime,
    ) -> Result<Option<Trip>, RepositoryError>;

    /// Trips on `route` departing on `date` with at least one free seat, earliest first.
    async fn list_open_trips(
        &self,
        route: &Route,
        date: NaiveDate,
    ) -> Result<Vec<Trip>, RepositoryError>;

    async fn total_change_fees(&self, booking_id: &BookingId) -> Result<i64, RepositoryError>;

    /// Change history for a booking, oldest first.
    async fn list_changes(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingChange>, RepositoryError>;

    async fn create_complaint(&self, complaint: NewComplaint)
        -> Result<Complaint, RepositoryError>;

    async fn get_complaint(&self, id: ComplaintId) -> Result<Option<Complaint>, RepositoryError>;

    async fn begin(&self) -> Result<Box<dyn ReservationTransaction>, RepositoryError>;
}

/// A unit of work over the reservation tables.
///
/// Nothing is visible to other callers until [`ReservationTransaction::commit`]; dropping
/// the transaction rolls every write back.
#[async_trait]
pub trait ReservationTransaction: Send {
    async fn find_booking(&mut self, id: &BookingId) -> Result<Option<Booking>, RepositoryError>;

    async fn find_trip(&mut self, id: &TripId) -> Result<Option<Trip>, RepositoryError>;

    async fn find_trip_at(
        &mut self,
        route: &Route,
        departure: &NaiveDateTime,
    ) -> Result<Option<Trip>, RepositoryError>;

    /// Applies `seats_available += delta` only if the result stays within
    /// `0..=seats_total`, re-checking the stored count at the moment of the write.
    /// Returns `false` when the guard refused the update or the trip does not exist.
    async fn adjust_seats(&mut self, trip_id: &TripId, delta: i64)
        -> Result<bool, RepositoryError>;

    async fn update_booking_departure(
        &mut self,
        id: &BookingId,
        departure: &NaiveDateTime,
    ) -> Result<(), RepositoryError>;

    async fn update_booking_status(
        &mut self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), RepositoryError>;

    async fn record_change(
        &mut self,
        change: NewBookingChange,
    ) -> Result<BookingChange, RepositoryError>;

    async fn total_change_fees(&mut self, booking_id: &BookingId)
        -> Result<i64, RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}
