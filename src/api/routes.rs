use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::health;
use super::metrics::prometheus_metrics;
use super::status::status;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Liveness, independent of the database
        .route("/health", get(health))
        // Database status
        .route("/", get(status))
        .route("/metrics", get(prometheus_metrics))
}
