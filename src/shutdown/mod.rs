//! Graceful shutdown handling for the status service.
//!
//! The HTTP server stops accepting connections and drains in-flight requests
//! first (axum's graceful shutdown). This module then:
//! 1. Closes the connection pool, releasing every connection
//! 2. Bounds that close with a timeout so termination is unconditional

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::signal;
use tokio::time::timeout;

use crate::config::ServerConfig;
use crate::postgres::PoolManager;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for the pool to close (default: 10 seconds)
    pub pool_close_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            pool_close_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerConfig> for ShutdownConfig {
    fn from(server: &ServerConfig) -> Self {
        Self {
            pool_close_timeout: server.shutdown_timeout(),
        }
    }
}

/// Releases the service's resources once the server has stopped
pub struct GracefulShutdown {
    pools: Arc<PoolManager>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(pools: Arc<PoolManager>) -> Self {
        Self::with_config(pools, ShutdownConfig::default())
    }

    pub fn with_config(pools: Arc<PoolManager>, config: ShutdownConfig) -> Self {
        Self { pools, config }
    }

    /// Execute the shutdown sequence. Never fails; problems are logged and
    /// reported in the result.
    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(
            reason = %reason,
            pool_state = self.pools.state().as_str(),
            "Closing database pool"
        );

        match timeout(self.config.pool_close_timeout, self.pools.close()).await {
            Ok(closed) => {
                result.pool_closed = closed;
                result.success = true;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.pool_close_timeout.as_millis(),
                    "Timed out closing database pool, exiting anyway"
                );
            }
        }

        result.duration = start.elapsed();

        tracing::info!(
            pool_closed = result.pool_closed,
            success = result.success,
            duration_ms = result.duration.as_millis(),
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether the pool closed within the timeout
    pub success: bool,
    /// Whether there was a live pool to close
    pub pool_closed: bool,
    /// Total time taken for shutdown
    pub duration: Duration,
}

/// Resolve on SIGINT (Ctrl+C) or SIGTERM, returning which one arrived.
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "SIGINT"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "SIGTERM"
        }
    }
}
