//! Prometheus metrics for the status service.
//!
//! - Probe metrics (outcome counts, round-trip latency)
//! - Pool lifecycle metrics (pools built, faults observed, current state)
//! - Pool occupancy, sampled at scrape time

mod helpers;

pub use helpers::{encode_metrics, PoolMetrics, ProbeMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "db_status";

lazy_static! {
    // ============================================================================
    // Probe Metrics
    // ============================================================================

    /// Status probes by outcome (ok, not_ready, unavailable)
    pub static ref PROBES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_probes_total", METRIC_PREFIX),
        "Total status probes by outcome",
        &["outcome"]
    ).unwrap();

    /// Probe round-trip latency, including connection acquire
    pub static ref PROBE_LATENCY: Histogram = register_histogram!(
        format!("{}_probe_latency_seconds", METRIC_PREFIX),
        "Status probe latency in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // ============================================================================
    // Pool Metrics
    // ============================================================================

    /// Pools constructed since start
    pub static ref POOLS_CREATED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pools_created_total", METRIC_PREFIX),
        "Total connection pools constructed"
    ).unwrap();

    /// Faults that invalidated a pool
    pub static ref POOL_FAULTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pool_faults_total", METRIC_PREFIX),
        "Total pool-level faults that invalidated the pool"
    ).unwrap();

    /// Pool manager state (0=unconfigured, 1=ready, 2=invalidated, 3=closed)
    pub static ref POOL_STATE: IntGauge = register_int_gauge!(
        format!("{}_pool_state", METRIC_PREFIX),
        "Pool manager state (0=unconfigured, 1=ready, 2=invalidated, 3=closed)"
    ).unwrap();

    /// Open connections in the live pool
    pub static ref POOL_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_connections", METRIC_PREFIX),
        "Open connections in the current pool"
    ).unwrap();

    /// Idle connections in the live pool
    pub static ref POOL_IDLE_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_idle_connections", METRIC_PREFIX),
        "Idle connections in the current pool"
    ).unwrap();
}
