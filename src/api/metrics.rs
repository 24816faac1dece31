//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};

use crate::metrics::{self, PoolMetrics};
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Sample pool gauges. Never builds a pool.
fn update_metrics_from_state(state: &AppState) {
    PoolMetrics::set_state(state.pools.state() as i64);

    match state.pools.current() {
        Some(handle) => PoolMetrics::set_connections(handle.pool().size(), handle.pool().num_idle()),
        None => PoolMetrics::set_connections(0, 0),
    }
}
