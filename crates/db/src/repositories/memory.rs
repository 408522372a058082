use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};

use rebook_core::domain::booking::{Booking, BookingId, BookingStatus, Route};
use rebook_core::domain::change::{BookingChange, NewBookingChange};
use rebook_core::domain::complaint::{Complaint, ComplaintId, ComplaintStatus, NewComplaint};
use rebook_core::domain::trip::{Trip, TripId};

use super::{RepositoryError, ReservationStore, ReservationTransaction};

#[derive(Clone, Debug, Default)]
struct ReservationData {
    bookings: BTreeMap<BookingId, Booking>,
    trips: BTreeMap<TripId, Trip>,
    changes: Vec<BookingChange>,
    complaints: Vec<Complaint>,
}

impl ReservationData {
    fn trip_at(&self, route: &Route, departure: &NaiveDateTime) -> Option<Trip> {
        self.trips
            .values()
            .find(|trip| &trip.route == route && &trip.departure == departure)
            .cloned()
    }

    fn total_change_fees(&self, booking_id: &BookingId) -> i64 {
        self.changes.iter().filter(|change| &change.booking_id == booking_id).map(|c| c.fee).sum()
    }
}

/// Process-local store. A transaction holds the only lock until it commits or drops,
/// so writers are fully serialized.
#[derive(Clone, Default)]
pub struct InMemoryReservationStore {
    data: Arc<Mutex<ReservationData>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_booking(&self, booking: Booking) {
        self.data.lock().await.bookings.insert(booking.id.clone(), booking);
    }

    pub async fn insert_trip(&self, trip: Trip) {
        self.data.lock().await.trips.insert(trip.id.clone(), trip);
    }
}

pub struct InMemoryReservationTransaction {
    guard: OwnedMutexGuard<ReservationData>,
    working: ReservationData,
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.data.lock().await.bookings.get(id).cloned())
    }

    async fn find_trip(&self, id: &TripId) -> Result<Option<Trip>, RepositoryError> {
        Ok(self.data.lock().await.trips.get(id).cloned())
    }

    async fn find_trip_at(
        &self,
        route: &Route,
        departure: &NaiveDateTime,
    ) -> Result<Option<Trip>, RepositoryError> {
        Ok(self.data.lock().await.trip_at(route, departure))
    }

    async fn list_open_trips(
        &self,
        route: &Route,
        date: NaiveDate,
    ) -> Result<Vec<Trip>, RepositoryError> {
        let data = self.data.lock().await;
        let mut trips: Vec<Trip> = data
            .trips
            .values()
            .filter(|trip| {
                &trip.route == route && trip.departure.date() == date && trip.has_free_seat()
            })
            .cloned()
            .collect();
        trips.sort_by(|left, right| {
            left.departure.cmp(&right.departure).then_with(|| left.id.cmp(&right.id))
        });
        Ok(trips)
    }

    async fn total_change_fees(&self, booking_id: &BookingId) -> Result<i64, RepositoryError> {
        Ok(self.data.lock().await.total_change_fees(booking_id))
    }

    async fn list_changes(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingChange>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data.changes.iter().filter(|change| &change.booking_id == booking_id).cloned().collect())
    }

    async fn create_complaint(
        &self,
        complaint: NewComplaint,
    ) -> Result<Complaint, RepositoryError> {
        let mut data = self.data.lock().await;
        let created = Complaint {
            id: ComplaintId(data.complaints.len() as i64 + 1),
            booking_id: complaint.booking_id,
            complaint_type: complaint.complaint_type,
            description: complaint.description,
            status: ComplaintStatus::Pending,
            created_at: complaint.created_at,
        };
        data.complaints.push(created.clone());
        Ok(created)
    }

    async fn get_complaint(&self, id: ComplaintId) -> Result<Option<Complaint>, RepositoryError> {
        let data = self.data.lock().await;
        Ok(data.complaints.iter().find(|complaint| complaint.id == id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn ReservationTransaction>, RepositoryError> {
        let guard = Arc::clone(&self.data).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryReservationTransaction { guard, working }))
    }
}

#[async_trait]
impl ReservationTransaction for InMemoryReservationTransaction {
    async fn find_booking(&mut self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        Ok(self.working.bookings.get(id).cloned())
    }

    async fn find_trip(&mut self, id: &TripId) -> Result<Option<Trip>, RepositoryError> {
        Ok(self.working.trips.get(id).cloned())
    }

    async fn find_trip_at(
        &mut self,
        route: &Route,
        departure: &NaiveDateTime,
    ) -> Result<Option<Trip>, RepositoryError> {
        Ok(self.working.trip_at(route, departure))
    }

    async fn adjust_seats(
        &mut self,
        trip_id: &TripId,
        delta: i64,
    ) -> Result<bool, RepositoryError> {
        let Some(trip) = self.working.trips.get_mut(trip_id) else {
            return Ok(false);
        };
        let adjusted = trip.seats_available + delta;
        if !(0..=trip.seats_total).contains(&adjusted) {
            return Ok(false);
        }
        trip.seats_available = adjusted;
        Ok(true)
    }

    async fn update_booking_departure(
        &mut self,
        id: &BookingId,
        departure: &NaiveDateTime,
    ) -> Result<(), RepositoryError> {
        let booking = self
            .working
            .bookings
            .get_mut(id)
            .ok_or_else(|| {
                RepositoryError::Decode(format!("booking {id} disappeared mid-update"))
            })?;
        booking.departure = *departure;
        Ok(())
    }

    async fn update_booking_status(
        &mut self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), RepositoryError> {
        let booking = self
            .working
            .bookings
            .get_mut(id)
            .ok_or_else(|| {
                RepositoryError::Decode(format!("booking {id} disappeared mid-update"))
            })?;
        booking.status = status;
        Ok(())
    }

    async fn record_change(
        &mut self,
        change: NewBookingChange,
    ) -> Result<BookingChange, RepositoryError> {
        let recorded = BookingChange {
            id: self.working.changes.len() as i64 + 1,
            booking_id: change.booking_id,
            old_departure: change.old_departure,
            new_departure: change.new_departure,
            fee: change.fee,
        };
        self.working.changes.push(recorded.clone());
        Ok(recorded)
    }

    async fn total_change_fees(
        &mut self,
        booking_id: &BookingId,
    ) -> Result<i64, RepositoryError> {
        Ok(self.working.total_change_fees(booking_id))
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
