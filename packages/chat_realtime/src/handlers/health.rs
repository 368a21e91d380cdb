use std::time::Duration;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Upper bound on the database probe behind `/health`.
const DB_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Health check endpoint - returns server health status
///
/// Degraded while the directory database cannot hand out a connection; the
/// cumulative error counters live under `/metrics`.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();

    let db_ok = matches!(
        tokio::time::timeout(DB_PROBE_TIMEOUT, state.db.pool.acquire()).await,
        Ok(Ok(_))
    );
    let status = if db_ok { "healthy" } else { "degraded" };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: snapshot.connections.active,
        online_users: state.hub.connected_count() as u64,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 once the database answers
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    match state.db.get_stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ready",
            "database": "connected",
            "stats": stats,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!("Readiness check failed: {e:#}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
                .into_response()
        }
    }
}
