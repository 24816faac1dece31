use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the status endpoint. Each maps to a 503 with a fixed body;
/// the underlying cause is only logged.
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("database not ready")]
    NotReady,

    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: &'static str,
}

impl StatusError {
    /// Client-facing message, never carries driver details.
    pub fn message(&self) -> &'static str {
        match self {
            StatusError::NotReady => "database not ready",
            StatusError::Unavailable(_) => "database unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            // The pool manager already warned when it found the settings missing
            StatusError::NotReady => tracing::debug!(
                status = %status.as_u16(),
                "Database not configured, status probe skipped"
            ),
            StatusError::Unavailable(e) => tracing::error!(
                status = %status.as_u16(),
                error = %e,
                "DB query failed"
            ),
        }

        let body = ErrorResponse {
            status: "error",
            message: self.message(),
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, StatusError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_ready_response() {
        let response = StatusError::NotReady.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({"status": "error", "message": "database not ready"})
        );
    }

    #[tokio::test]
    async fn test_unavailable_hides_driver_error() {
        let err = StatusError::Unavailable(sqlx::Error::PoolTimedOut);
        assert!(err.to_string().contains("database unavailable"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(response).await;
        assert_eq!(
            body,
            serde_json::json!({"status": "error", "message": "database unavailable"})
        );
    }
}
