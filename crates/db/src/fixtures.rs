use crate::connection::DbPool;
use crate::repositories::RepositoryError;
use sqlx::Executor;

/// Demo bookings and the state the verification contract expects for each.
const SEED_BOOKINGS: &[SeedBookingContract] = &[
    SeedBookingContract {
        booking_id: "VX123456",
        route_from: "HCM",
        route_to: "Da Lat",
        depart_time: "2025-09-05T20:00:00",
        status: "PAID",
        current_trip_id: "T003",
    },
    SeedBookingContract {
        booking_id: "VX789012",
        route_from: "HCM",
        route_to: "Hanoi",
        depart_time: "2025-09-07T08:00:00",
        status: "PAID",
        current_trip_id: "T101",
    },
    SeedBookingContract {
        booking_id: "VX345678",
        route_from: "Da Lat",
        route_to: "HCM",
        depart_time: "2025-09-06T14:00:00",
        status: "PAID",
        current_trip_id: "T201",
    },
    SeedBookingContract {
        booking_id: "VX901234",
        route_from: "HCM",
        route_to: "Nha Trang",
        depart_time: "2025-09-08T10:00:00",
        status: "CANCELLED",
        current_trip_id: "T301",
    },
    SeedBookingContract {
        booking_id: "VX567890",
        route_from: "Hanoi",
        route_to: "HCM",
        depart_time: "2025-09-09T16:00:00",
        status: "PAID",
        current_trip_id: "T401",
    },
];

const SEED_ROUTES: &[SeedRouteContract] = &[
    SeedRouteContract {
        route_from: "HCM",
        route_to: "Da Lat",
        trip_count: 7,
        label: "route-hcm-dalat",
    },
    SeedRouteContract {
        route_from: "HCM",
        route_to: "Hanoi",
        trip_count: 5,
        label: "route-hcm-hanoi",
    },
    SeedRouteContract {
        route_from: "Da Lat",
        route_to: "HCM",
        trip_count: 5,
        label: "route-dalat-hcm",
    },
    SeedRouteContract {
        route_from: "HCM",
        route_to: "Nha Trang",
        trip_count: 4,
        label: "route-hcm-nhatrang",
    },
    SeedRouteContract {
        route_from: "Hanoi",
        route_to: "HCM",
        trip_count: 4,
        label: "route-hanoi-hcm",
    },
    SeedRouteContract {
        route_from: "HCM",
        route_to: "Vung Tau",
        trip_count: 4,
        label: "route-hcm-vungtau",
    },
    SeedRouteContract {
        route_from: "HCM",
        route_to: "Can Tho",
        trip_count: 4,
        label: "route-hcm-cantho",
    },
];

const SOLD_OUT_TRIP_IDS: &[&str] = &["T004", "T007", "T103", "T204", "T301", "T603"];

/// Deterministic demo reservations: five bookings and 33 trips across seven routes,
/// including sold-out departures and one cancelled booking.
pub struct ReservationSeedDataset;

impl ReservationSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/reservation_seed.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            bookings_seeded: SEED_BOOKINGS.iter().map(|booking| booking.booking_id).collect(),
            trips_seeded: SEED_ROUTES.iter().map(|route| route.trip_count).sum(),
        })
    }

    /// Verify that seed data exists and matches the contract.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for booking in SEED_BOOKINGS {
            let booking_ok: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM bookings
                 WHERE booking_id = ?1 AND route_from = ?2 AND route_to = ?3 AND status = ?4)",
            )
            .bind(booking.booking_id)
            .bind(booking.route_from)
            .bind(booking.route_to)
            .bind(booking.status)
            .fetch_one(pool)
            .await?;
            checks.push((booking.booking_id, booking_ok == 1));

            let current_trip: Option<String> = sqlx::query_scalar(
                "SELECT t.trip_id FROM trips t JOIN bookings b
                   ON t.route_from = b.route_from AND t.route_to = b.route_to
                  AND t.depart_time = b.depart_time
                 WHERE b.booking_id = ?1
                 ORDER BY t.trip_id LIMIT 1",
            )
            .bind(booking.booking_id)
            .fetch_optional(pool)
            .await?;
            checks.push((
                booking.current_trip_label(),
                current_trip.as_deref() == Some(booking.current_trip_id),
            ));
        }

        for route in SEED_ROUTES {
            let trip_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(1) FROM trips WHERE route_from = ?1 AND route_to = ?2",
            )
            .bind(route.route_from)
            .bind(route.route_to)
            .fetch_one(pool)
            .await?;
            checks.push((route.label, trip_count == route.trip_count as i64));
        }

        let sold_out = sql_array_from_ids(SOLD_OUT_TRIP_IDS);
        let sold_out_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM trips WHERE trip_id IN {sold_out} AND seats_available = 0"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("sold-out-trips", sold_out_count == SOLD_OUT_TRIP_IDS.len() as i64));

        let out_of_bounds: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM trips WHERE seats_available < 0 OR seats_available > seats_total",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("seat-bounds", out_of_bounds == 0));

        let all_present = checks.iter().all(|(_, exists)| *exists);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded rows and anything written against the seeded bookings.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let booking_ids = sql_array_from_ids(
            &SEED_BOOKINGS.iter().map(|booking| booking.booking_id).collect::<Vec<_>>(),
        );
        let routes = SEED_ROUTES
            .iter()
            .map(|route| format!("('{}','{}')", route.route_from, route.route_to))
            .collect::<Vec<_>>()
            .join(",");

        sqlx::query(&format!("DELETE FROM complaints WHERE booking_id IN {booking_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM booking_changes WHERE booking_id IN {booking_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM bookings WHERE booking_id IN {booking_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "DELETE FROM trips WHERE (route_from, route_to) IN (VALUES {routes})"
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedBookingContract {
    booking_id: &'static str,
    route_from: &'static str,
    route_to: &'static str,
    depart_time: &'static str,
    status: &'static str,
    current_trip_id: &'static str,
}

impl SeedBookingContract {
    fn current_trip_label(&self) -> &'static str {
        match self.booking_id {
            "VX123456" => "VX123456-current-trip",
            "VX789012" => "VX789012-current-trip",
            "VX345678" => "VX345678-current-trip",
            "VX901234" => "VX901234-current-trip",
            _ => "VX567890-current-trip",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedRouteContract {
    route_from: &'static str,
    route_to: &'static str,
    trip_count: usize,
    label: &'static str,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub bookings_seeded: Vec<&'static str>,
    pub trips_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
