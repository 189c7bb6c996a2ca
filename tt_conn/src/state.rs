//! ABOUTME: Connection lifecycle states and the stats owned by the manager
//! ABOUTME: Stats are exposed to other components as owned snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::settings::ManagerConfig;

/// Lifecycle state of the managed connection.
///
/// Exactly one value at any instant, owned exclusively by the
/// connection manager. `Failed` is terminal: it is only left by an
/// explicit external `connect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Point-in-time snapshot of the manager's counters.
///
/// `uptime_ms` is derived from `connected_at` at snapshot time;
/// `avg_latency_ms` is an exponential moving average (weight 0.1 for
/// each new sample).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub avg_latency_ms: f64,
    pub uptime_ms: f64,
}

impl ConnectionStats {
    /// Percentage of queries that succeeded, 0-100.
    /// Defined as 100 when no queries have run yet.
    pub fn success_rate(&self) -> f64 {
        success_rate(self.total_queries, self.failed_queries)
    }
}

/// Success rate over a pair of counters, 0-100; 100 when no queries ran
pub fn success_rate(total_queries: u64, failed_queries: u64) -> f64 {
    if total_queries == 0 {
        100.0
    } else {
        let succeeded = total_queries.saturating_sub(failed_queries) as f64;
        succeeded / total_queries as f64 * 100.0
    }
}

/// Fold one latency sample into the running exponential moving average
pub(crate) fn fold_latency_ema(current: f64, sample_ms: f64) -> f64 {
    if current == 0.0 {
        sample_ms
    } else {
        current * 0.9 + sample_ms * 0.1
    }
}

/// Derived query counters exposed alongside the raw stats
#[derive(Debug, Clone, Serialize)]
pub struct QueryPerformance {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
}

/// Stats plus the live configuration, for status surfaces
#[derive(Debug, Clone, Serialize)]
pub struct DetailedStats {
    #[serde(flatten)]
    pub stats: ConnectionStats,
    pub configuration: ManagerConfig,
    pub performance: QueryPerformance,
}

/// Read-only view of the manager's stats, the seam the monitor samples
/// through without being generic over the driver.
pub trait StatsSource: Send + Sync {
    fn connection_stats(&self) -> ConnectionStats;
}
