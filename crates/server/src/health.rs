use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use rebook_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

/// Readiness follows the database check alone. An empty inventory is reported, not fatal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub inventory: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, inventory) =
        tokio::join!(database_check(&state.db_pool), inventory_check(&state.db_pool));
    let ready = database.is_ready();

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck::ready("rebook-server accepting turns"),
        database,
        inventory,
        checked_at: Utc::now().to_rfc3339(),
    };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn inventory_check(pool: &DbPool) -> HealthCheck {
    let open_seats = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*), COALESCE(SUM(seats_available), 0) FROM trips",
    )
    .fetch_one(pool)
    .await;

    match open_seats {
        Ok((0, _)) => HealthCheck {
            status: "empty",
            detail: "no trips loaded; run `rebook seed`".to_string(),
        },
        Ok((trips, seats)) => {
            HealthCheck::ready(format!("{trips} trips loaded, {seats} seats open"))
        }
        Err(error) => HealthCheck::degraded(format!("inventory query failed: {error}")),
    }
}
