//! Lazily built PostgreSQL pool that is discarded after a connection-level fault.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::DatabaseConfig;
use crate::metrics::PoolMetrics;

/// Probe used by the status endpoint.
const PROBE_QUERY: &str = "SELECT NOW() AS now";

/// Pool manager lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    /// No pool has been built, or the settings needed to build one are missing
    Unconfigured = 0,
    /// A pool is live and handed out to requests
    Ready = 1,
    /// The last pool saw a fault; the next request builds a new one
    Invalidated = 2,
    /// Shut down; no pool will be built again
    Closed = 3,
}

impl PoolState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Unconfigured => "unconfigured",
            PoolState::Ready => "ready",
            PoolState::Invalidated => "invalidated",
            PoolState::Closed => "closed",
        }
    }
}

/// Shared handle on one pool generation.
///
/// Cloning is cheap; every clone refers to the same set of connections.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    pool: PgPool,
    generation: u64,
}

impl PoolHandle {
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Generation this handle was built as. Pass it back to
    /// [`PoolManager::report_fault`] so stale reports can be told apart.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run the probe query and return the server's current time.
    pub async fn probe(&self) -> Result<DateTime<Utc>, sqlx::Error> {
        sqlx::query_scalar::<_, DateTime<Utc>>(PROBE_QUERY)
            .fetch_one(&self.pool)
            .await
    }
}

enum Slot {
    Unconfigured,
    Ready(PoolHandle),
    Invalidated,
    Closed,
}

impl Slot {
    fn state(&self) -> PoolState {
        match self {
            Slot::Unconfigured => PoolState::Unconfigured,
            Slot::Ready(_) => PoolState::Ready,
            Slot::Invalidated => PoolState::Invalidated,
            Slot::Closed => PoolState::Closed,
        }
    }
}

struct Inner {
    slot: Slot,
    /// Generation of the most recently built pool, 0 before the first
    generation: u64,
}

/// Owns at most one pool at a time.
///
/// Construction is lazy and performs no network I/O, so it happens under a
/// short synchronous lock and concurrent callers share the same generation.
pub struct PoolManager {
    config: DatabaseConfig,
    inner: Mutex<Inner>,
    /// Set while unconfigured and the warning has already been logged
    warned_unconfigured: AtomicBool,
}

impl PoolManager {
    pub fn new(config: DatabaseConfig) -> Self {
        PoolMetrics::set_state(PoolState::Unconfigured as i64);

        Self {
            config,
            inner: Mutex::new(Inner {
                slot: Slot::Unconfigured,
                generation: 0,
            }),
            warned_unconfigured: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(inner: &mut Inner, slot: Slot) -> Slot {
        PoolMetrics::set_state(slot.state() as i64);
        std::mem::replace(&mut inner.slot, slot)
    }

    pub fn state(&self) -> PoolState {
        self.lock().slot.state()
    }

    /// Generation of the most recently built pool (0 if none was ever built).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Live handle, if any, without building one.
    pub fn current(&self) -> Option<PoolHandle> {
        match &self.lock().slot {
            Slot::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Return the live pool, building one first if needed.
    ///
    /// `None` means the database is not configured (or the manager is closed).
    /// That is a normal state, not an error.
    pub fn get_or_create(&self) -> Option<PoolHandle> {
        let mut inner = self.lock();

        match &inner.slot {
            Slot::Ready(handle) => return Some(handle.clone()),
            Slot::Closed => {
                tracing::debug!("Pool manager closed, not building a pool");
                return None;
            }
            Slot::Unconfigured | Slot::Invalidated => {}
        }

        let options = match self.config.connect_options() {
            Ok(options) => options,
            Err(missing) => {
                if !self.warned_unconfigured.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        missing = %missing.0.join(","),
                        "DB not configured yet; / will return 503 until DB is ready"
                    );
                } else {
                    tracing::debug!(missing = %missing.0.join(","), "DB still not configured");
                }
                Self::transition(&mut inner, Slot::Unconfigured);
                return None;
            }
        };
        self.warned_unconfigured.store(false, Ordering::Release);

        inner.generation += 1;
        let generation = inner.generation;

        let pool = PgPoolOptions::new()
            .max_connections(self.config.pool_max)
            .acquire_timeout(self.config.connect_timeout())
            .idle_timeout(self.config.idle_timeout())
            .after_connect(move |_conn, _meta| {
                Box::pin(async move {
                    tracing::info!(generation, "Connected to PostgreSQL");
                    Ok::<_, sqlx::Error>(())
                })
            })
            .connect_lazy_with(options);

        tracing::info!(
            generation,
            host = %self.config.host_for_log(),
            port = self.config.port,
            tls = self.config.tls_enabled(),
            max_connections = self.config.pool_max,
            "PostgreSQL connection pool created"
        );
        PoolMetrics::record_created();

        let handle = PoolHandle { pool, generation };
        Self::transition(&mut inner, Slot::Ready(handle.clone()));
        Some(handle)
    }

    /// Error observer: discard the pool of `generation` after a fault.
    ///
    /// Returns `true` if the live pool was invalidated. Reports for a pool that
    /// has already been replaced or closed are ignored.
    pub fn report_fault(&self, generation: u64, error: &sqlx::Error) -> bool {
        let discarded = {
            let mut inner = self.lock();
            match &inner.slot {
                Slot::Ready(handle) if handle.generation == generation => {}
                _ => {
                    tracing::debug!(generation, error = %error, "Ignoring fault for stale pool");
                    return false;
                }
            }
            Self::transition(&mut inner, Slot::Invalidated)
        };

        tracing::error!(generation, error = %error, "Unexpected DB error, resetting pool");
        PoolMetrics::record_fault();

        // Release the broken pool's connections without holding up the caller
        if let Slot::Ready(handle) = discarded {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { handle.pool.close().await });
            }
        }

        true
    }

    /// Close the live pool, if any, and refuse to build another.
    ///
    /// Returns `true` if a pool was closed.
    pub async fn close(&self) -> bool {
        let previous = {
            let mut inner = self.lock();
            Self::transition(&mut inner, Slot::Closed)
        };

        match previous {
            Slot::Ready(handle) => {
                handle.pool.close().await;
                tracing::info!(generation = handle.generation, "PostgreSQL connection pool closed");
                true
            }
            _ => false,
        }
    }
}

/// Whether `error` means the pool's connections are broken, as opposed to a
/// failure of the single query (server-side error, acquire timeout).
pub fn is_connection_fault(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> DatabaseConfig {
        DatabaseConfig {
            host: Some("127.0.0.1".into()),
            user: Some("app".into()),
            password: Some("secret".into()),
            name: Some("status".into()),
            port: 1,
            conn_timeout_ms: 200,
            ..DatabaseConfig::default()
        }
    }

    fn io_fault() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ))
    }

    #[tokio::test]
    async fn test_unconfigured_returns_none() {
        let manager = PoolManager::new(DatabaseConfig::default());

        assert!(manager.get_or_create().is_none());
        assert!(manager.get_or_create().is_none());
        assert_eq!(manager.state(), PoolState::Unconfigured);
        assert_eq!(manager.generation(), 0);
        assert!(manager.current().is_none());
    }

    #[tokio::test]
    async fn test_sentinel_host_is_unconfigured() {
        let config = DatabaseConfig {
            host: Some("None".into()),
            ..unreachable_config()
        };
        let manager = PoolManager::new(config);

        assert!(manager.get_or_create().is_none());
        assert_eq!(manager.state(), PoolState::Unconfigured);
    }

    #[tokio::test]
    async fn test_builds_once_and_reuses() {
        let manager = PoolManager::new(unreachable_config());

        let first = manager.get_or_create().expect("pool should be built");
        let second = manager.get_or_create().expect("pool should be reused");

        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 1);
        assert_eq!(manager.state(), PoolState::Ready);
        assert_eq!(manager.current().map(|h| h.generation()), Some(1));
        // Lazy: nothing connected yet
        assert_eq!(first.pool().size(), 0);
    }

    #[tokio::test]
    async fn test_fault_invalidates_and_next_call_rebuilds() {
        let manager = PoolManager::new(unreachable_config());
        let broken = manager.get_or_create().unwrap();

        assert!(manager.report_fault(broken.generation(), &io_fault()));
        assert_eq!(manager.state(), PoolState::Invalidated);
        assert!(manager.current().is_none());

        let rebuilt = manager.get_or_create().unwrap();
        assert_eq!(rebuilt.generation(), 2);
        assert_eq!(manager.state(), PoolState::Ready);
    }

    #[tokio::test]
    async fn test_stale_fault_is_ignored() {
        let manager = PoolManager::new(unreachable_config());
        let old = manager.get_or_create().unwrap();
        manager.report_fault(old.generation(), &io_fault());
        let fresh = manager.get_or_create().unwrap();

        assert!(!manager.report_fault(old.generation(), &sqlx::Error::PoolClosed));
        assert_eq!(manager.state(), PoolState::Ready);
        assert_eq!(manager.current().unwrap().generation(), fresh.generation());
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let manager = PoolManager::new(unreachable_config());
        let handle = manager.get_or_create().unwrap();

        assert!(manager.close().await);
        assert_eq!(manager.state(), PoolState::Closed);
        assert!(handle.pool().is_closed());
        assert!(manager.get_or_create().is_none());
        assert!(!manager.close().await);
    }

    #[tokio::test]
    async fn test_close_without_pool() {
        let manager = PoolManager::new(DatabaseConfig::default());
        assert!(!manager.close().await);
        assert_eq!(manager.state(), PoolState::Closed);
    }

    #[tokio::test]
    async fn test_probe_against_unreachable_server_fails() {
        let manager = PoolManager::new(unreachable_config());
        let handle = manager.get_or_create().unwrap();

        assert!(handle.probe().await.is_err());
        // The manager is untouched until someone reports a fault
        assert_eq!(manager.state(), PoolState::Ready);
    }

    #[test]
    fn test_fault_classification() {
        assert!(is_connection_fault(&io_fault()));
        assert!(is_connection_fault(&sqlx::Error::PoolClosed));
        assert!(is_connection_fault(&sqlx::Error::WorkerCrashed));
        assert!(is_connection_fault(&sqlx::Error::Protocol("bad frame".into())));

        assert!(!is_connection_fault(&sqlx::Error::PoolTimedOut));
        assert!(!is_connection_fault(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PoolState::Unconfigured.as_str(), "unconfigured");
        assert_eq!(PoolState::Ready.as_str(), "ready");
        assert_eq!(PoolState::Invalidated.as_str(), "invalidated");
        assert_eq!(PoolState::Closed.as_str(), "closed");
    }
}
