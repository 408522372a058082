use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use rebook_core::domain::booking::{
    format_departure, parse_departure, Booking, BookingId, BookingStatus, Route,
};
use rebook_core::domain::change::{BookingChange, NewBookingChange};
use rebook_core::domain::complaint::{
    Complaint, ComplaintId, ComplaintStatus, ComplaintType, NewComplaint,
};
use rebook_core::domain::trip::{Trip, TripId};

use super::{RepositoryError, ReservationStore, ReservationTransaction};
use crate::DbPool;

const BOOKING_COLUMNS: &str =
    "booking_id, route_from, route_to, depart_time, status, seat_class, user_phone";
const TRIP_COLUMNS: &str =
    "trip_id, route_from, route_to, depart_time, seats_total, seats_available, base_price";

pub struct SqlReservationStore {
    pool: DbPool,
}

impl SqlReservationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

pub struct SqlReservationTransaction {
    tx: Transaction<'static, Sqlite>,
}

fn decode_error(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// SQLite reports lock conflicts as BUSY/LOCKED and their extended variants.
fn is_busy_code(code: &str) -> bool {
    matches!(code, "5" | "6" | "261" | "262" | "517" | "773")
}

fn classify_error(error: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(database_error) = &error {
        let busy = database_error.code().map(|code| is_busy_code(code.as_ref())).unwrap_or(false);
        if busy || database_error.message().contains("database is locked") {
            return RepositoryError::Contention(database_error.message().to_string());
        }
    }
    RepositoryError::Database(error)
}

fn parse_stored_departure(column: &str, value: &str) -> Result<NaiveDateTime, RepositoryError> {
    parse_departure(value)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid {column} value `{value}`")))
}

fn row_to_booking(row: &SqliteRow) -> Result<Booking, RepositoryError> {
    let booking_id: String = row.try_get("booking_id").map_err(decode_error)?;
    let route_from: String = row.try_get("route_from").map_err(decode_error)?;
    let route_to: String = row.try_get("route_to").map_err(decode_error)?;
    let depart_time: String = row.try_get("depart_time").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let seat_class: String = row.try_get("seat_class").map_err(decode_error)?;
    let user_phone: Option<String> = row.try_get("user_phone").map_err(decode_error)?;

    let status = BookingStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown booking status `{status}`")))?;

    Ok(Booking {
        id: BookingId(booking_id),
        route: Route::new(route_from, route_to),
        departure: parse_stored_departure("depart_time", &depart_time)?,
        status,
        seat_class,
        contact_phone: user_phone,
    })
}

fn row_to_trip(row: &SqliteRow) -> Result<Trip, RepositoryError> {
    let trip_id: String = row.try_get("trip_id").map_err(decode_error)?;
    let route_from: String = row.try_get("route_from").map_err(decode_error)?;
    let route_to: String = row.try_get("route_to").map_err(decode_error)?;
    let depart_time: String = row.try_get("depart_time").map_err(decode_error)?;

    Ok(Trip {
        id: TripId(trip_id),
        route: Route::new(route_from, route_to),
        departure: parse_stored_departure("depart_time", &depart_time)?,
        seats_total: row.try_get("seats_total").map_err(decode_error)?,
        seats_available: row.try_get("seats_available").map_err(decode_error)?,
        base_price: row.try_get("base_price").map_err(decode_error)?,
    })
}

fn row_to_change(row: &SqliteRow) -> Result<BookingChange, RepositoryError> {
    let booking_id: String = row.try_get("booking_id").map_err(decode_error)?;
    let old_time: String = row.try_get("old_time").map_err(decode_error)?;
    let new_time: String = row.try_get("new_time").map_err(decode_error)?;

    Ok(BookingChange {
        id: row.try_get("id").map_err(decode_error)?,
        booking_id: BookingId(booking_id),
        old_departure: parse_stored_departure("old_time", &old_time)?,
        new_departure: parse_stored_departure("new_time", &new_time)?,
        fee: row.try_get("fee").map_err(decode_error)?,
    })
}

fn row_to_complaint(row: &SqliteRow) -> Result<Complaint, RepositoryError> {
    let booking_id: String = row.try_get("booking_id").map_err(decode_error)?;
    let complaint_type: String = row.try_get("complaint_type").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;
    let created_at: String = row.try_get("created_at").map_err(decode_error)?;

    Ok(Complaint {
        id: ComplaintId(row.try_get("id").map_err(decode_error)?),
        booking_id: BookingId(booking_id),
        complaint_type: ComplaintType::parse(&complaint_type).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown complaint type `{complaint_type}`"))
        })?,
        description: row.try_get("description").map_err(decode_error)?,
        status: ComplaintStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown complaint status `{status}`"))
        })?,
        created_at: parse_stored_departure("created_at", &created_at)?,
    })
}

#[async_trait]
impl ReservationStore for SqlReservationStore {
    async fn find_booking(&self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_booking).transpose()
    }

    async fn find_trip(&self, id: &TripId) -> Result<Option<Trip>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_trip).transpose()
    }

    async fn find_trip_at(
        &self,
        route: &Route,
        departure: &NaiveDateTime,
    ) -> Result<Option<Trip>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips
             WHERE route_from = ? AND route_to = ? AND depart_time = ?
             ORDER BY trip_id LIMIT 1"
        ))
        .bind(&route.from)
        .bind(&route.to)
        .bind(format_departure(departure))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_trip).transpose()
    }

    async fn list_open_trips(
        &self,
        route: &Route,
        date: NaiveDate,
    ) -> Result<Vec<Trip>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips
             WHERE route_from = ? AND route_to = ? AND substr(depart_time, 1, 10) = ?
               AND seats_available > 0
             ORDER BY depart_time ASC, trip_id ASC"
        ))
        .bind(&route.from)
        .bind(&route.to)
        .bind(date.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_trip).collect()
    }

    async fn total_change_fees(&self, booking_id: &BookingId) -> Result<i64, RepositoryError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(fee), 0) FROM booking_changes WHERE booking_id = ?",
        )
        .bind(booking_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn list_changes(
        &self,
        booking_id: &BookingId,
    ) -> Result<Vec<BookingChange>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, booking_id, old_time, new_time, fee FROM booking_changes
             WHERE booking_id = ? ORDER BY id ASC",
        )
        .bind(booking_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_change).collect()
    }

    async fn create_complaint(
        &self,
        complaint: NewComplaint,
    ) -> Result<Complaint, RepositoryError> {
        let status = ComplaintStatus::Pending;
        let result = sqlx::query(
            "INSERT INTO complaints (booking_id, complaint_type, description, status, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(complaint.booking_id.as_str())
        .bind(complaint.complaint_type.as_str())
        .bind(&complaint.description)
        .bind(status.as_str())
        .bind(format_departure(&complaint.created_at))
        .execute(&self.pool)
        .await
        .map_err(classify_error)?;

        Ok(Complaint {
            id: ComplaintId(result.last_insert_rowid()),
            booking_id: complaint.booking_id,
            complaint_type: complaint.complaint_type,
            description: complaint.description,
            status,
            created_at: complaint.created_at,
        })
    }

    async fn get_complaint(&self, id: ComplaintId) -> Result<Option<Complaint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, booking_id, complaint_type, description, status, created_at
             FROM complaints WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_complaint).transpose()
    }

    async fn begin(&self) -> Result<Box<dyn ReservationTransaction>, RepositoryError> {
        let tx = self.pool.begin().await.map_err(classify_error)?;
        Ok(Box::new(SqlReservationTransaction { tx }))
    }
}

#[async_trait]
impl ReservationTransaction for SqlReservationTransaction {
    async fn find_booking(&mut self, id: &BookingId) -> Result<Option<Booking>, RepositoryError> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify_error)?;

        row.as_ref().map(row_to_booking).transpose()
    }

    async fn find_trip(&mut self, id: &TripId) -> Result<Option<Trip>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE trip_id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(classify_error)?;

        row.as_ref().map(row_to_trip).transpose()
    }

    async fn find_trip_at(
        &mut self,
        route: &Route,
        departure: &NaiveDateTime,
    ) -> Result<Option<Trip>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips
             WHERE route_from = ? AND route_to = ? AND depart_time = ?
             ORDER BY trip_id LIMIT 1"
        ))
        .bind(&route.from)
        .bind(&route.to)
        .bind(format_departure(departure))
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(classify_error)?;

        row.as_ref().map(row_to_trip).transpose()
    }

    async fn adjust_seats(
        &mut self,
        trip_id: &TripId,
        delta: i64,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE trips SET seats_available = seats_available + ?1
             WHERE trip_id = ?2 AND seats_available + ?1 BETWEEN 0 AND seats_total",
        )
        .bind(delta)
        .bind(trip_id.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(classify_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_booking_departure(
        &mut self,
        id: &BookingId,
        departure: &NaiveDateTime,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE bookings SET depart_time = ? WHERE booking_id = ?")
            .bind(format_departure(departure))
            .bind(id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(classify_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Decode(format!("booking {id} disappeared mid-update")));
        }
        Ok(())
    }

    async fn update_booking_status(
        &mut self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE bookings SET status = ? WHERE booking_id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(classify_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Decode(format!("booking {id} disappeared mid-update")));
        }
        Ok(())
    }

    async fn record_change(
        &mut self,
        change: NewBookingChange,
    ) -> Result<BookingChange, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO booking_changes (booking_id, old_time, new_time, fee) VALUES (?, ?, ?, ?)",
        )
        .bind(change.booking_id.as_str())
        .bind(format_departure(&change.old_departure))
        .bind(format_departure(&change.new_departure))
        .bind(change.fee)
        .execute(&mut *self.tx)
        .await
        .map_err(classify_error)?;

        Ok(BookingChange {
            id: result.last_insert_rowid(),
            booking_id: change.booking_id,
            old_departure: change.old_departure,
            new_departure: change.new_departure,
            fee: change.fee,
        })
    }

    async fn total_change_fees(
        &mut self,
        booking_id: &BookingId,
    ) -> Result<i64, RepositoryError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(fee), 0) FROM booking_changes WHERE booking_id = ?",
        )
        .bind(booking_id.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(classify_error)?;
        Ok(total)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(classify_error)
    }
}
