//! ABOUTME: Prometheus metrics for the connection manager
//! ABOUTME: Counters fed by lifecycle events, gauges from snapshots

use parking_lot::Mutex;
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::AtomicU64;

use tt_conn::ConnectionState;
use tt_core::Result;

use crate::snapshot::MetricsSnapshot;

/// Gauge value for each connection state
/// (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=failed)
pub fn state_gauge_value(state: ConnectionState) -> i64 {
    match state {
        ConnectionState::Disconnected => 0,
        ConnectionState::Connecting => 1,
        ConnectionState::Connected => 2,
        ConnectionState::Reconnecting => 3,
        ConnectionState::Failed => 4,
    }
}

/// Prometheus metric set for one connection manager
#[derive(Debug)]
pub struct ConnMetrics {
    registry: Mutex<Registry>,
    /// Total reconnections completed successfully
    pub reconnects_total: Counter,
    /// Total connect attempts that errored
    pub connect_errors_total: Counter,
    /// Total health probes run
    pub health_checks_total: Counter,
    /// Total health probes that failed or timed out
    pub health_check_failures_total: Counter,
    /// Total alerts raised at any level
    pub alerts_total: Counter,
    /// Current connection state as a numeric gauge
    pub connection_state: Gauge,
    /// Cumulative queries observed at the last sample
    pub total_queries: Gauge,
    /// Cumulative failed queries observed at the last sample
    pub failed_queries: Gauge,
    /// Latency EMA from the last sample
    pub avg_latency_ms: Gauge<f64, AtomicU64>,
    /// Resident set size from the last sample
    pub memory_rss_bytes: Gauge,
}

impl ConnMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconnects_total = Counter::default();
        registry.register(
            "db_reconnects_total",
            "Successful reconnections",
            reconnects_total.clone(),
        );

        let connect_errors_total = Counter::default();
        registry.register(
            "db_connect_errors_total",
            "Failed connection attempts",
            connect_errors_total.clone(),
        );

        let health_checks_total = Counter::default();
        registry.register(
            "db_health_checks_total",
            "Health probes run",
            health_checks_total.clone(),
        );

        let health_check_failures_total = Counter::default();
        registry.register(
            "db_health_check_failures_total",
            "Health probes that failed or timed out",
            health_check_failures_total.clone(),
        );

        let alerts_total = Counter::default();
        registry.register("db_alerts_total", "Alerts raised", alerts_total.clone());

        let connection_state = Gauge::default();
        registry.register(
            "db_connection_state",
            "Connection state (0=disconnected 1=connecting 2=connected 3=reconnecting 4=failed)",
            connection_state.clone(),
        );

        let total_queries = Gauge::default();
        registry.register(
            "db_queries_total",
            "Cumulative queries at last sample",
            total_queries.clone(),
        );

        let failed_queries = Gauge::default();
        registry.register(
            "db_queries_failed",
            "Cumulative failed queries at last sample",
            failed_queries.clone(),
        );

        let avg_latency_ms = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "db_avg_latency_ms",
            "Query latency exponential moving average",
            avg_latency_ms.clone(),
        );

        let memory_rss_bytes = Gauge::default();
        registry.register(
            "db_memory_rss_bytes",
            "Process resident set size",
            memory_rss_bytes.clone(),
        );

        Self {
            registry: Mutex::new(registry),
            reconnects_total,
            connect_errors_total,
            health_checks_total,
            health_check_failures_total,
            alerts_total,
            connection_state,
            total_queries,
            failed_queries,
            avg_latency_ms,
            memory_rss_bytes,
        }
    }

    /// Update the gauges from a fresh snapshot
    pub fn observe_snapshot(&self, snapshot: &MetricsSnapshot) {
        self.connection_state
            .set(state_gauge_value(snapshot.connection_state));
        self.total_queries.set(snapshot.total_queries as i64);
        self.failed_queries.set(snapshot.failed_queries as i64);
        self.avg_latency_ms.set(snapshot.avg_latency_ms);
        self.memory_rss_bytes.set(snapshot.memory_rss_bytes as i64);
    }

    /// Text exposition of all registered metrics
    pub fn encode(&self) -> Result<String> {
        let registry = self.registry.lock();
        let mut buffer = String::new();
        encode(&mut buffer, &registry)
            .map_err(|e| tt_core::Error::Config(format!("Failed to encode metrics: {}", e)))?;
        Ok(buffer)
    }
}

impl Default for ConnMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tt_core::utc_now;

    fn snapshot(state: ConnectionState) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: utc_now(),
            connection_state: state,
            uptime_ms: 1_000.0,
            total_queries: 12,
            failed_queries: 3,
            success_rate: 75.0,
            avg_latency_ms: 42.5,
            reconnect_attempts: 0,
            memory_rss_bytes: 1024,
            cpu_percent: 0.0,
        }
    }

    #[test]
    fn test_state_gauge_values_are_distinct() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ];
        let mut values: Vec<i64> = states.iter().map(|s| state_gauge_value(*s)).collect();
        values.dedup();
        assert_eq!(values.len(), states.len());
    }

    #[test]
    fn test_snapshot_feeds_gauges_and_encodes() {
        let metrics = ConnMetrics::new();
        metrics.observe_snapshot(&snapshot(ConnectionState::Connected));
        metrics.reconnects_total.inc();

        let text = metrics.encode().expect("encode succeeds");
        assert!(text.contains("db_connection_state 2"));
        assert!(text.contains("db_queries_total 12"));
        assert!(text.contains("db_reconnects_total"));
    }
}
