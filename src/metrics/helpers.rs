//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, HistogramTimer, TextEncoder};

use super::{
    POOLS_CREATED_TOTAL, POOL_CONNECTIONS, POOL_FAULTS_TOTAL, POOL_IDLE_CONNECTIONS, POOL_STATE,
    PROBES_TOTAL, PROBE_LATENCY,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording status probe metrics
pub struct ProbeMetrics;

impl ProbeMetrics {
    pub fn record_ok() {
        PROBES_TOTAL.with_label_values(&["ok"]).inc();
    }

    pub fn record_not_ready() {
        PROBES_TOTAL.with_label_values(&["not_ready"]).inc();
    }

    pub fn record_unavailable() {
        PROBES_TOTAL.with_label_values(&["unavailable"]).inc();
    }

    /// Start timing a probe; the latency is observed when the timer drops
    pub fn start_timer() -> HistogramTimer {
        PROBE_LATENCY.start_timer()
    }
}

/// Helper struct for recording pool lifecycle metrics
pub struct PoolMetrics;

impl PoolMetrics {
    pub fn record_created() {
        POOLS_CREATED_TOTAL.inc();
    }

    pub fn record_fault() {
        POOL_FAULTS_TOTAL.inc();
    }

    pub fn set_state(state: i64) {
        POOL_STATE.set(state);
    }

    /// Set connection gauges (zero when there is no live pool)
    pub fn set_connections(open: u32, idle: usize) {
        POOL_CONNECTIONS.set(i64::from(open));
        POOL_IDLE_CONNECTIONS.set(idle as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_metrics() {
        ProbeMetrics::record_ok();
        PoolMetrics::record_created();
        PoolMetrics::set_state(1);

        let output = encode_metrics().unwrap();
        assert!(output.contains("db_status_probes_total"));
        assert!(output.contains("db_status_pools_created_total"));
        assert!(output.contains("db_status_pool_state"));
    }

    #[test]
    fn test_probe_timer_observes() {
        let before = PROBE_LATENCY.get_sample_count();
        drop(ProbeMetrics::start_timer());
        assert!(PROBE_LATENCY.get_sample_count() > before);
    }
}
