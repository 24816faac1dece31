use anyhow::Result;
use tokio::net::TcpListener;

use db_status_service::config::Settings;
use db_status_service::server::{create_app, AppState};
use db_status_service::shutdown::{wait_for_signal, GracefulShutdown, ShutdownConfig};
use db_status_service::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    let _telemetry = init_telemetry(&settings.logging, &settings.otel)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings);
    let settings = state.settings.clone();
    let pools = state.pools.clone();

    // Create Axum app
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server running on {}", addr);
    tracing::info!(
        db_host = %settings.database.host_for_log(),
        db_configured = settings.database.is_configured(),
        "Database settings"
    );

    // Run server with graceful shutdown; in-flight requests are drained first
    let (reason_tx, reason_rx) = tokio::sync::oneshot::channel();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = reason_tx.send(wait_for_signal().await);
        })
        .await;

    if let Err(e) = &served {
        tracing::error!(error = %e, "Server error");
    }

    let reason = reason_rx.await.unwrap_or("server stopped");
    GracefulShutdown::with_config(pools, ShutdownConfig::from(&settings.server))
        .execute(reason)
        .await;

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}
