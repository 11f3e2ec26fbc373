use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::handlers::AppState;

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `up` when the database answers, `down` otherwise
    pub status: String,
    pub version: String,
    pub database: String,
    pub uptime_secs: u64,
    pub timestamp: String,
}

/// Liveness and database readiness
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let (status, database) = match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "up"),
        Err(err) => {
            tracing::error!(error = %err, "database ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "down")
        }
    };
    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "health check");

    let body = HealthResponse {
        status: if status.is_success() { "up" } else { "down" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
        uptime_secs: uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (status, Json(body))
}
