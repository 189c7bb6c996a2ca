//! ABOUTME: Immutable point-in-time sample of connection and process state
//! ABOUTME: One snapshot per monitor tick, kept in a bounded history

use chrono::{DateTime, Utc};
use serde::Serialize;
use tt_conn::ConnectionState;

/// One sample of connection stats plus process resource usage.
///
/// Created once per monitor tick and never mutated afterwards.
/// `cpu_percent` is a delta against the previous sample; the first
/// sample establishes the baseline and reports zero.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub uptime_ms: f64,
    pub total_queries: u64,
    pub failed_queries: u64,
    /// 0-100; defined as 100 when no queries have run
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub reconnect_attempts: u32,
    pub memory_rss_bytes: u64,
    pub cpu_percent: f64,
}

impl MetricsSnapshot {
    /// Percentage of queries that failed, 0-100
    pub fn failure_rate(&self) -> f64 {
        100.0 - self.success_rate
    }
}
