//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
mod routes;
mod status;

pub use health::health;
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
pub use status::{status, StatusResponse};
