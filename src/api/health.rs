use crate::observability::{HealthChecker, MetricsRecorder};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

/// GET /health/live - Liveness probe
#[tracing::instrument(skip(health_checker))]
pub async fn liveness(
    State(health_checker): State<Arc<HealthChecker>>,
) -> impl IntoResponse {
    Json(health_checker.liveness().await)
}

/// GET /health/ready - Store reachable and window scripts loaded
#[tracing::instrument(skip(health_checker))]
pub async fn readiness(
    State(health_checker): State<Arc<HealthChecker>>,
) -> impl IntoResponse {
    let status = health_checker.readiness().await;

    let code = if status.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(status))
}

/// GET /metrics - Prometheus metrics
pub async fn metrics() -> Result<String, StatusCode> {
    MetricsRecorder::export().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
