//! JSON routes over the agent runtime and the reservation engine.
//!
//! - `POST /chat`                            one conversational turn
//! - `GET  /bookings/{id}`                   booking plus its resolved current trip
//! - `GET  /bookings/{id}/candidates?date=`  open trips on the booking's route for a date
//! - `POST /bookings/{id}/quote`             fee quote for a target trip or departure
//! - `POST /bookings/{id}/apply`             move the booking onto a trip
//! - `POST /bookings/{id}/cancel`            cancel with refund breakdown
//! - `GET  /bookings/{id}/invoice`           invoice with change fees
//! - `GET  /trips/available?route_from=&route_to=&date=`
//! - `POST /complaints`                      file a complaint against a booking
//!
//! Unknown ids answer 404, business refusals 409, and internal faults 500 with a generic body.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use rebook_agent::{TurnReply, TurnRequest};
use rebook_core::audit::AuditContext;
use rebook_core::domain::billing::{CancellationOutcome, Invoice};
use rebook_core::domain::booking::{parse_departure, parse_travel_date, Booking, BookingId, Route};
use rebook_core::domain::change::{ChangeOutcome, ChangeQuote};
use rebook_core::domain::complaint::{Complaint, ComplaintType};
use rebook_core::domain::conversation::MediaType;
use rebook_core::domain::trip::{Trip, TripId};
use rebook_core::errors::ApplicationError;
use rebook_db::EngineError;

use crate::bootstrap::Runtime;

const DEFAULT_THREAD_ID: &str = "default";
const API_ACTOR: &str = "http-api";

#[derive(Clone)]
pub struct ApiState {
    runtime: Arc<Runtime>,
}

impl ApiState {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }
}

pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/candidates", get(list_candidates))
        .route("/bookings/{id}/quote", post(quote_change))
        .route("/bookings/{id}/apply", post(apply_change))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/invoice", get(get_invoice))
        .route("/trips/available", get(available_trips))
        .route("/complaints", post(create_complaint))
        .with_state(ApiState::new(runtime))
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: Option<String>,
    pub media_type: Option<MediaType>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub booking: Booking,
    pub current_trip: Option<Trip>,
}

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct AvailableTripsQuery {
    pub route_from: String,
    pub route_to: String,
    pub date: String,
}

/// Either a trip to move onto or a bare departure time (`YYYY-MM-DDTHH:MM[:SS]`).
#[derive(Debug, Deserialize)]
pub struct QuoteRequest {
    pub trip_id: Option<TripId>,
    pub new_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    pub trip_id: TripId,
}

#[derive(Debug, Deserialize)]
pub struct ComplaintRequest {
    pub booking_id: BookingId,
    pub complaint_type: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ApiError {
    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ApiErrorBody {
                error: message.into(),
                correlation_id: correlation_id.to_string(),
            },
        }
    }

    fn from_engine(error: EngineError, correlation_id: &str, operation: &'static str) -> Self {
        if let EngineError::NotFound(domain) = &error {
            if domain.is_not_found() {
                return Self {
                    status: StatusCode::NOT_FOUND,
                    body: ApiErrorBody {
                        error: domain.to_string(),
                        correlation_id: correlation_id.to_string(),
                    },
                };
            }
        }

        error!(
            event_name = "api.request.failed",
            correlation_id = %correlation_id,
            operation,
            error = %error,
            "reservation operation failed"
        );
        let interface = ApplicationError::from(error).into_interface(correlation_id);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ApiErrorBody {
                error: interface.user_message().to_string(),
                correlation_id: interface.correlation_id().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn parse_date(value: &str, correlation_id: &str) -> Result<NaiveDate, ApiError> {
    parse_travel_date(value).ok_or_else(|| {
        let message = format!("`{value}` is not a date (expected YYYY-MM-DD)");
        ApiError::bad_request(message, correlation_id)
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn chat(
    State(state): State<ApiState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    if body.message.trim().is_empty() && body.attachments.is_empty() {
        return Err(ApiError::bad_request("message is required", &correlation_id()));
    }

    let thread_id = body
        .thread_id
        .map(|thread| thread.trim().to_string())
        .filter(|thread| !thread.is_empty())
        .unwrap_or_else(|| DEFAULT_THREAD_ID.to_string());

    let reply = state
        .runtime
        .handle_turn(TurnRequest {
            thread_id,
            message: body.message,
            media_type: body.media_type,
            attachments: body.attachments,
        })
        .await;
    Ok(Json(reply))
}

async fn get_booking(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<BookingView>, ApiError> {
    let correlation_id = correlation_id();
    let engine = state.runtime.engine();
    let booking = engine
        .get_booking(&BookingId(id))
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "get_booking"))?;
    let current_trip = engine
        .current_trip(&booking)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "current_trip"))?;

    Ok(Json(BookingView { booking, current_trip }))
}

async fn list_candidates(
    Path(id): Path<String>,
    Query(query): Query<DateQuery>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<Trip>>, ApiError> {
    let correlation_id = correlation_id();
    let date = parse_date(&query.date, &correlation_id)?;

    let trips = state
        .runtime
        .engine()
        .candidates(&BookingId(id), date)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "candidates"))?;
    Ok(Json(trips))
}

/// A refused quote is an answer, not a failure: it comes back as 200 with `not_allowed`.
async fn quote_change(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<QuoteRequest>,
) -> Result<Json<ChangeQuote>, ApiError> {
    let correlation_id = correlation_id();
    let engine = state.runtime.engine();

    let target = match (body.trip_id, body.new_time) {
        (Some(trip_id), _) => {
            engine
                .get_trip(&trip_id)
                .await
                .map_err(|error| ApiError::from_engine(error, &correlation_id, "get_trip"))?
                .departure
        }
        (None, Some(new_time)) => parse_departure(&new_time).ok_or_else(|| {
            ApiError::bad_request(
                format!("`{new_time}` is not a departure time (expected YYYY-MM-DDTHH:MM:SS)"),
                &correlation_id,
            )
        })?,
        (None, None) => {
            return Err(ApiError::bad_request("trip_id or new_time is required", &correlation_id))
        }
    };

    let quote = engine
        .quote_change(&BookingId(id), target)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "quote_change"))?;
    Ok(Json(quote))
}

async fn apply_change(
    Path(id): Path<String>,
    State(state): State<ApiState>,
    Json(body): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<ChangeOutcome>), ApiError> {
    let correlation_id = correlation_id();
    let audit = AuditContext::new(None, None, &correlation_id, API_ACTOR);

    let outcome = state
        .runtime
        .engine()
        .apply_change(&BookingId(id), &body.trip_id, &audit)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "apply_change"))?;

    let status = match outcome {
        ChangeOutcome::Rejected { .. } => StatusCode::CONFLICT,
        ChangeOutcome::Applied(_) | ChangeOutcome::Unchanged(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn cancel_booking(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<CancellationOutcome>), ApiError> {
    let correlation_id = correlation_id();
    let audit = AuditContext::new(None, None, &correlation_id, API_ACTOR);

    let outcome = state
        .runtime
        .engine()
        .cancel_booking(&BookingId(id), &audit)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "cancel_booking"))?;

    let status = match outcome {
        CancellationOutcome::Rejected { .. } => StatusCode::CONFLICT,
        CancellationOutcome::Cancelled(_) => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

async fn get_invoice(
    Path(id): Path<String>,
    State(state): State<ApiState>,
) -> Result<Json<Invoice>, ApiError> {
    let correlation_id = correlation_id();
    let invoice = state
        .runtime
        .engine()
        .get_invoice(&BookingId(id))
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "get_invoice"))?;
    Ok(Json(invoice))
}

async fn available_trips(
    Query(query): Query<AvailableTripsQuery>,
    State(state): State<ApiState>,
) -> Result<Json<Vec<Trip>>, ApiError> {
    let correlation_id = correlation_id();
    let date = parse_date(&query.date, &correlation_id)?;
    let route = Route::new(query.route_from.trim(), query.route_to.trim());

    let trips = state
        .runtime
        .engine()
        .available_trips(&route, date)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "available_trips"))?;
    Ok(Json(trips))
}

async fn create_complaint(
    State(state): State<ApiState>,
    Json(body): Json<ComplaintRequest>,
) -> Result<(StatusCode, Json<Complaint>), ApiError> {
    let correlation_id = correlation_id();
    let complaint_type = ComplaintType::parse(&body.complaint_type).ok_or_else(|| {
        ApiError::bad_request(
            format!(
                "unknown complaint_type `{}` (expected SERVICE|REFUND|CANCELLATION|OTHER)",
                body.complaint_type
            ),
            &correlation_id,
        )
    })?;
    if body.description.trim().is_empty() {
        return Err(ApiError::bad_request("description is required", &correlation_id));
    }

    let audit = AuditContext::new(None, None, &correlation_id, API_ACTOR);
    let complaint = state
        .runtime
        .engine()
        .create_complaint(&body.booking_id, complaint_type, &body.description, &audit)
        .await
        .map_err(|error| ApiError::from_engine(error, &correlation_id, "create_complaint"))?;

    info!(
        event_name = "api.complaint.created",
        correlation_id = %correlation_id,
        booking_id = %complaint.booking_id,
        complaint_id = %complaint.id,
        "complaint filed via api"
    );
    Ok((StatusCode::CREATED, Json(complaint)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use chrono::NaiveDateTime;
    use rebook_agent::{AgentRuntime, KnowledgeBase, RuleBasedExtractor};
    use rebook_core::clock::FixedClock;
    use rebook_core::fees::BookingPolicy;
    use rebook_db::{
        connect_with_settings, migrations, ReservationEngine, ReservationSeedDataset,
        SqlReservationStore,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;

    fn reference_now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-09-02T09:00:00", "%Y-%m-%dT%H:%M:%S")
            .expect("valid reference time")
    }

    async fn app() -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        ReservationSeedDataset::load(&pool).await.expect("seed");

        let clock = Arc::new(FixedClock(reference_now()));
        let engine = ReservationEngine::new(
            SqlReservationStore::new(pool),
            BookingPolicy::default(),
            clock.clone(),
        );
        let runtime = AgentRuntime::new(
            Arc::new(engine),
            Arc::new(RuleBasedExtractor::new(clock)),
            Arc::new(KnowledgeBase::builtin().expect("builtin knowledge base")),
        );
        router(Arc::new(runtime))
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    #[tokio::test]
    async fn chat_walks_a_multi_turn_change_on_one_thread() {
        let app = app().await;

        let (status, first) = send(
            &app,
            Method::POST,
            "/chat",
            Some(json!({"message": "I want to change booking VX123456", "thread_id": "web-1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["intent"], "change_time");
        assert_eq!(first["booking_id"], "VX123456");
        assert!(first["reply"].as_str().expect("reply").contains("new travel date"));

        let turn = json!({"message": "6/9", "thread_id": "web-1"});
        let (_, second) = send(&app, Method::POST, "/chat", Some(turn)).await;
        assert_eq!(second["date"], "2025-09-06");
        assert!(second["reply"].as_str().expect("reply").contains("T001"));

        let turn = json!({"message": "T001", "thread_id": "web-1"});
        let (_, third) = send(&app, Method::POST, "/chat", Some(turn)).await;
        assert_eq!(third["trip_id"], "T001");
        assert_eq!(third["result"]["status"], "applied");
        assert_eq!(third["result"]["fee"], 100_000);
    }

    #[tokio::test]
    async fn chat_defaults_the_thread_and_rejects_blank_messages() {
        let app = app().await;

        let (status, reply) =
            send(&app, Method::POST, "/chat", Some(json!({"message": "VX123456"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["booking_id"], "VX123456");

        let turn = json!({"message": "6/9", "thread_id": " "});
        let (_, follow_up) = send(&app, Method::POST, "/chat", Some(turn)).await;
        assert_eq!(follow_up["booking_id"], "VX123456", "blank thread falls back to default");

        let blank = json!({"message": "  "});
        let (status, body) = send(&app, Method::POST, "/chat", Some(blank)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "message is required");
    }

    #[tokio::test]
    async fn booking_lookup_resolves_the_current_trip() {
        let app = app().await;

        let (status, body) = send(&app, Method::GET, "/bookings/VX123456", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["booking"]["status"], "PAID");
        assert_eq!(body["current_trip"]["id"], "T003");

        let (status, body) = send(&app, Method::GET, "/bookings/VX000000", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().expect("error").contains("VX000000"));
        assert!(body["correlation_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn candidates_list_open_trips_in_departure_order() {
        let app = app().await;

        let (status, body) =
            send(&app, Method::GET, "/bookings/VX123456/candidates?date=2025-09-06", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .expect("trip list")
            .iter()
            .filter_map(|trip| trip["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["T001", "T002"]);

        let (status, _) =
            send(&app, Method::GET, "/bookings/VX123456/candidates?date=06-09-2025", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn quote_reports_the_fee_tier() {
        let app = app().await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/bookings/VX123456/quote",
            Some(json!({"trip_id": "T001"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "allowed");
        assert_eq!(body["fee"], 100_000);

        let (_, body) = send(
            &app,
            Method::POST,
            "/bookings/VX123456/quote",
            Some(json!({"new_time": "2025-09-05T22:00:00"})),
        )
        .await;
        assert_eq!(body["fee"], 50_000);

        let (status, _) =
            send(&app, Method::POST, "/bookings/VX123456/quote", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn apply_moves_the_seat_and_refuses_sold_out_trips() {
        let app = app().await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/bookings/VX123456/apply",
            Some(json!({"trip_id": "T004"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["reason"], "seats-unavailable");

        let (status, body) = send(
            &app,
            Method::POST,
            "/bookings/VX123456/apply",
            Some(json!({"trip_id": "T001"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "applied");
        assert_eq!(body["new_departure"], "2025-09-06T08:00:00");
        assert_eq!(body["old_trip_id"], "T003");

        let (status, body) = send(
            &app,
            Method::POST,
            "/bookings/VX123456/apply",
            Some(json!({"trip_id": "T001"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "unchanged");

        let (status, _) = send(
            &app,
            Method::POST,
            "/bookings/VX123456/apply",
            Some(json!({"trip_id": "T999"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_returns_refund_and_conflicts_on_second_attempt() {
        let app = app().await;

        send(&app, Method::POST, "/bookings/VX123456/apply", Some(json!({"trip_id": "T001"})))
            .await;
        let (status, body) = send(&app, Method::POST, "/bookings/VX123456/cancel", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "cancelled");
        assert_eq!(body["change_fees"], 100_000);
        assert_eq!(body["released_trip_id"], "T001");

        let (status, body) = send(&app, Method::POST, "/bookings/VX123456/cancel", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["reason"], "not-cancellable");
    }

    #[tokio::test]
    async fn invoice_sums_base_price_and_change_fees() {
        let app = app().await;

        let (status, body) = send(&app, Method::GET, "/bookings/VX123456/invoice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["base_price"], 250_000);
        assert_eq!(body["change_fees"], 0);
        assert_eq!(body["total_amount"], 250_000);
        assert_eq!(body["base_price_resolved"], true);
    }

    #[tokio::test]
    async fn available_trips_filter_by_route_and_date() {
        let app = app().await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/trips/available?route_from=HCM&route_to=Da%20Lat&date=2025-09-07",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .expect("trip list")
            .iter()
            .filter_map(|trip| trip["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["T005", "T006"]);
    }

    #[tokio::test]
    async fn complaints_are_created_and_validated() {
        let app = app().await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/complaints",
            Some(json!({
                "booking_id": "VX123456",
                "complaint_type": "service",
                "description": "driver was late"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["complaint_type"], "SERVICE");
        assert_eq!(body["booking_id"], "VX123456");

        let (status, _) = send(
            &app,
            Method::POST,
            "/complaints",
            Some(json!({
                "booking_id": "VX123456",
                "complaint_type": "noise",
                "description": "loud music"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            Method::POST,
            "/complaints",
            Some(json!({
                "booking_id": "VX000000",
                "complaint_type": "OTHER",
                "description": "lost luggage"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
