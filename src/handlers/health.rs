use crate::{errors::ServiceError, AppState};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::time::Instant;

/// Tracks application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Liveness plus a database ping; 503 when the database is unreachable.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_check_start = Instant::now();
    let db_result = crate::db::check_connection(&state.db).await;
    let db_latency = db_check_start.elapsed().as_millis() as u64;

    let (status, body) = match db_result {
        Ok(()) => (
            StatusCode::OK,
            json!({
                "status": "up",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": get_uptime_secs(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "checks": { "database": { "status": "up", "latency_ms": db_latency } }
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "down",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_secs": get_uptime_secs(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "checks": { "database": { "status": "down", "error": e.to_string() } }
            }),
        ),
    };
    (status, Json(body))
}

/// Prometheus text exposition.
pub async fn metrics() -> Result<impl IntoResponse, ServiceError> {
    let body = crate::metrics::render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
