//! PostgreSQL persistence module.
//!
//! Provides the lazily built connection pool and its fault tracking.

pub mod pool;

pub use pool::{is_connection_fault, PoolHandle, PoolManager, PoolState};
