use std::time::Duration;

use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::entities::votable_item;
use crate::state::AppState;
use crate::voting::ItemStatus;

mod voting;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(600);

pub fn router(state: AppState) -> Router {
    // Board portal calls the API from the browser
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE])
        .max_age(PREFLIGHT_MAX_AGE);

    Router::new()
        .route("/health", get(liveness))
        .route("/health/ready", get(readiness))
        .nest("/voting", voting::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Liveness {
    status: &'static str,
    uptime_seconds: u64,
}

async fn liveness(State(state): State<AppState>) -> Json<Liveness> {
    Json(Liveness {
        status: "live",
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: &'static str,
    open_items: u64,
    cached_items: u64,
    eligible_roles: Vec<String>,
}

/// Ready once the database answers; reports how many items are in `voting`.
async fn readiness(State(state): State<AppState>) -> Result<Json<Readiness>, HttpError> {
    let open_items = votable_item::Entity::find()
        .filter(votable_item::Column::Status.eq(ItemStatus::Voting.as_str()))
        .count(&state.database)
        .await
        .map_err(|err| HttpError::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string()))?;

    Ok(Json(Readiness {
        status: "ready",
        open_items,
        cached_items: state.cache.items.entry_count(),
        eligible_roles: state.voting.eligible_roles.clone(),
    }))
}

/// Error surfaced to API clients as `{"error": "..."}`.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(
            status.is_client_error() || status.is_server_error(),
            "HttpError needs a 4xx or 5xx status"
        );
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, "Request failed: {}", self.message);
        } else {
            debug!(status = %self.status, "Request rejected: {}", self.message);
        }
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}
