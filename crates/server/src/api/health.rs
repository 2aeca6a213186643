//! `GET /health` and `GET /metrics` — the two read-only operational
//! endpoints the ambient stack calls for; no admin UX, per the non-goals.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

/// Prometheus text exposition format content type.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// `GET /health` — liveness only; does not probe the storage backends, so a
/// degraded store doesn't itself fail the liveness check a load balancer
/// polls at high frequency.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    summary = "Liveness check",
    responses((status = 200, description = "Process is up"))
)]
#[allow(clippy::unused_async)]
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /metrics` — request/decision counters and usage-buffer drop count in
/// Prometheus text exposition format.
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Health",
    summary = "Prometheus metrics",
    responses((status = 200, description = "Prometheus text format metrics", content_type = "text/plain"))
)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let dropped = state.usage_recorder.dropped_count();
    let body = crate::metrics::render(&state.metrics, dropped);
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}
