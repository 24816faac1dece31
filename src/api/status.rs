//! Database status endpoint.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, StatusError};
use crate::metrics::ProbeMetrics;
use crate::postgres::is_connection_fault;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub time: DateTime<Utc>,
}

/// GET / - run the probe query against the current pool
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>> {
    let Some(handle) = state.pools.get_or_create() else {
        ProbeMetrics::record_not_ready();
        return Err(StatusError::NotReady);
    };

    let timer = ProbeMetrics::start_timer();
    let result = handle.probe().await;
    drop(timer);

    match result {
        Ok(time) => {
            ProbeMetrics::record_ok();
            Ok(Json(StatusResponse { status: "ok", time }))
        }
        Err(e) => {
            ProbeMetrics::record_unavailable();
            if is_connection_fault(&e) {
                state.pools.report_fault(handle.generation(), &e);
            }
            Err(StatusError::Unavailable(e))
        }
    }
}
