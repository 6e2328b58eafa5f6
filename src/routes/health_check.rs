use crate::health::check_database_health;
use crate::startup::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, utoipa::ToSchema)]
pub struct HealthReport {
    /// `ok` or `unhealthy`
    pub status: String,
    /// `reachable` or `unreachable`
    pub database: String,
}

impl HealthReport {
    pub fn reachable() -> Self {
        Self {
            status: "ok".into(),
            database: "reachable".into(),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            status: "unhealthy".into(),
            database: "unreachable".into(),
        }
    }
}

/// Database health check
///
/// Opens a session, runs `SELECT 1` and reports whether the database answered.
/// Every call probes the database again.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Database is reachable", body = HealthReport),
        (status = 503, description = "Database is unreachable", body = HealthReport)
    )
)]
#[tracing::instrument(name = "Health check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    if check_database_health(state.sessions.as_ref(), state.probe_timeout).await {
        (StatusCode::OK, Json(HealthReport::reachable())).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(HealthReport::unreachable())).into_response()
    }
}
