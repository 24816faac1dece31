//! Liveness endpoint.

/// GET /health - always `200 ok`, never touches the database
pub async fn health() -> &'static str {
    "ok"
}
