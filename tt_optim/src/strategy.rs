//! ABOUTME: Optimization strategies as data: triggers plus adjustments
//! ABOUTME: Applying a strategy is a pure function over pool settings

use serde::{Deserialize, Serialize};
use tt_conn::PoolSettings;
use tt_obs::MetricsSnapshot;

/// Pool settings field an adjustment targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolField {
    MinConnections,
    MaxConnections,
    AcquireTimeoutMs,
    CreateTimeoutMs,
    IdleTimeoutMs,
}

/// How the field value changes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustOp {
    /// Add a (possibly negative) delta
    Offset(i64),
    /// Multiply by a factor
    Scale(f64),
}

/// One field adjustment with clamp bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adjustment {
    pub field: PoolField,
    pub op: AdjustOp,
    pub clamp_min: u64,
    pub clamp_max: u64,
}

/// Predicates over window aggregates; ANY satisfied predicate triggers
/// the strategy. Absent predicates never trigger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConditions {
    /// Only snapshots newer than now minus this window are considered
    pub time_window_ms: u64,
    /// Strategy is skipped with fewer samples in the window
    pub min_metrics_count: usize,
    pub max_avg_latency_ms: Option<f64>,
    pub max_failure_rate: Option<f64>,
    pub min_throughput_qps: Option<f64>,
    pub max_cpu_percent: Option<f64>,
    pub max_memory_bytes: Option<u64>,
    pub min_reconnect_attempts: Option<f64>,
}

impl TriggerConditions {
    pub fn triggered(&self, window: &WindowAggregates) -> bool {
        if let Some(max) = self.max_avg_latency_ms {
            if window.avg_latency_ms > max {
                return true;
            }
        }
        if let Some(max) = self.max_failure_rate {
            if window.failure_rate > max {
                return true;
            }
        }
        if let Some(min) = self.min_throughput_qps {
            if window.throughput_qps < min {
                return true;
            }
        }
        if let Some(max) = self.max_cpu_percent {
            if window.avg_cpu_percent > max {
                return true;
            }
        }
        if let Some(max) = self.max_memory_bytes {
            if window.avg_memory_bytes > max as f64 {
                return true;
            }
        }
        if let Some(min) = self.min_reconnect_attempts {
            if window.avg_reconnect_attempts > min {
                return true;
            }
        }
        false
    }
}

/// A named, prioritized optimization rule.
///
/// Strategies are configuration, not code: adding, disabling, or
/// reprioritizing one never touches the evaluation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    /// Lower numbers are evaluated first and win ties
    pub priority: u32,
    pub trigger: TriggerConditions,
    pub actions: Vec<Adjustment>,
}

/// Aggregates over the snapshots inside a strategy's window
#[derive(Debug, Clone, Default)]
pub struct WindowAggregates {
    pub samples: usize,
    pub avg_latency_ms: f64,
    /// Mean of per-sample failure percentages
    pub failure_rate: f64,
    /// Query-count delta over the elapsed time between the first and
    /// last snapshot. An approximation sensitive to sampling
    /// irregularities; adequate for coarse low-usage detection.
    pub throughput_qps: f64,
    pub avg_cpu_percent: f64,
    pub avg_memory_bytes: f64,
    pub avg_reconnect_attempts: f64,
}

/// Compute window aggregates from snapshots ordered oldest-first
pub fn aggregate(snapshots: &[MetricsSnapshot]) -> WindowAggregates {
    if snapshots.is_empty() {
        return WindowAggregates::default();
    }
    let count = snapshots.len() as f64;
    let mut aggregates = WindowAggregates {
        samples: snapshots.len(),
        ..WindowAggregates::default()
    };
    for snapshot in snapshots {
        aggregates.avg_latency_ms += snapshot.avg_latency_ms;
        aggregates.failure_rate += snapshot.failure_rate();
        aggregates.avg_cpu_percent += snapshot.cpu_percent;
        aggregates.avg_memory_bytes += snapshot.memory_rss_bytes as f64;
        aggregates.avg_reconnect_attempts += snapshot.reconnect_attempts as f64;
    }
    aggregates.avg_latency_ms /= count;
    aggregates.failure_rate /= count;
    aggregates.avg_cpu_percent /= count;
    aggregates.avg_memory_bytes /= count;
    aggregates.avg_reconnect_attempts /= count;

    if snapshots.len() >= 2 {
        let first = &snapshots[0];
        let last = &snapshots[snapshots.len() - 1];
        let elapsed_secs = (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
        if elapsed_secs > 0.0 {
            let delta = last.total_queries.saturating_sub(first.total_queries) as f64;
            aggregates.throughput_qps = delta / elapsed_secs;
        }
    }
    aggregates
}

/// Apply a strategy's adjustments to the current settings.
///
/// Pure: the caller decides whether and how to commit the result. The
/// min <= max invariant is repaired after all adjustments run.
pub fn apply_strategy(strategy: &OptimizationStrategy, current: &PoolSettings) -> PoolSettings {
    let mut next = current.clone();
    for adjustment in &strategy.actions {
        let value = read_field(&next, adjustment.field);
        let adjusted = match adjustment.op {
            AdjustOp::Offset(delta) => (value as i64).saturating_add(delta).max(0) as u64,
            AdjustOp::Scale(factor) => (value as f64 * factor).round() as u64,
        };
        let clamped = adjusted.clamp(adjustment.clamp_min, adjustment.clamp_max);
        write_field(&mut next, adjustment.field, clamped);
    }
    if next.min_connections > next.max_connections {
        next.min_connections = next.max_connections;
    }
    next
}

fn read_field(settings: &PoolSettings, field: PoolField) -> u64 {
    match field {
        PoolField::MinConnections => settings.min_connections as u64,
        PoolField::MaxConnections => settings.max_connections as u64,
        PoolField::AcquireTimeoutMs => settings.acquire_timeout_ms,
        PoolField::CreateTimeoutMs => settings.create_timeout_ms,
        PoolField::IdleTimeoutMs => settings.idle_timeout_ms,
    }
}

fn write_field(settings: &mut PoolSettings, field: PoolField, value: u64) {
    match field {
        PoolField::MinConnections => settings.min_connections = value as u32,
        PoolField::MaxConnections => settings.max_connections = value as u32,
        PoolField::AcquireTimeoutMs => settings.acquire_timeout_ms = value,
        PoolField::CreateTimeoutMs => settings.create_timeout_ms = value,
        PoolField::IdleTimeoutMs => settings.idle_timeout_ms = value,
    }
}

/// The built-in strategy set, ordered by priority
pub fn default_strategies() -> Vec<OptimizationStrategy> {
    vec![
        OptimizationStrategy {
            name: "high-latency".to_string(),
            description: "Raise the connection ceiling when queries run slow".to_string(),
            enabled: true,
            priority: 1,
            trigger: TriggerConditions {
                time_window_ms: 300_000,
                min_metrics_count: 5,
                max_avg_latency_ms: Some(500.0),
                ..TriggerConditions::default()
            },
            actions: vec![Adjustment {
                field: PoolField::MaxConnections,
                op: AdjustOp::Offset(5),
                clamp_min: 1,
                clamp_max: 50,
            }],
        },
        OptimizationStrategy {
            name: "high-failure-rate".to_string(),
            description: "Stretch acquire/create timeouts when queries keep failing".to_string(),
            enabled: true,
            priority: 2,
            trigger: TriggerConditions {
                time_window_ms: 300_000,
                min_metrics_count: 5,
                max_failure_rate: Some(5.0),
                ..TriggerConditions::default()
            },
            actions: vec![
                Adjustment {
                    field: PoolField::AcquireTimeoutMs,
                    op: AdjustOp::Scale(1.5),
                    clamp_min: 1_000,
                    clamp_max: 60_000,
                },
                Adjustment {
                    field: PoolField::CreateTimeoutMs,
                    op: AdjustOp::Scale(1.5),
                    clamp_min: 1_000,
                    clamp_max: 60_000,
                },
            ],
        },
        OptimizationStrategy {
            name: "low-throughput".to_string(),
            description: "Shrink the pool while query volume is low".to_string(),
            enabled: true,
            priority: 3,
            trigger: TriggerConditions {
                time_window_ms: 600_000,
                min_metrics_count: 10,
                min_throughput_qps: Some(1.0),
                ..TriggerConditions::default()
            },
            actions: vec![
                Adjustment {
                    field: PoolField::MaxConnections,
                    op: AdjustOp::Offset(-2),
                    clamp_min: 5,
                    clamp_max: 50,
                },
                Adjustment {
                    field: PoolField::MinConnections,
                    op: AdjustOp::Offset(-1),
                    clamp_min: 1,
                    clamp_max: 10,
                },
            ],
        },
        OptimizationStrategy {
            name: "high-memory".to_string(),
            description: "Shed idle connections under memory pressure".to_string(),
            enabled: true,
            priority: 4,
            trigger: TriggerConditions {
                time_window_ms: 300_000,
                min_metrics_count: 5,
                max_memory_bytes: Some(512 * 1024 * 1024),
                ..TriggerConditions::default()
            },
            actions: vec![
                Adjustment {
                    field: PoolField::IdleTimeoutMs,
                    op: AdjustOp::Scale(0.5),
                    clamp_min: 5_000,
                    clamp_max: 300_000,
                },
                Adjustment {
                    field: PoolField::MaxConnections,
                    op: AdjustOp::Offset(-2),
                    clamp_min: 5,
                    clamp_max: 50,
                },
            ],
        },
        OptimizationStrategy {
            name: "recovery".to_string(),
            description: "Back off aggressively after repeated connection failures".to_string(),
            enabled: true,
            priority: 5,
            trigger: TriggerConditions {
                time_window_ms: 120_000,
                min_metrics_count: 3,
                min_reconnect_attempts: Some(2.0),
                ..TriggerConditions::default()
            },
            actions: vec![
                Adjustment {
                    field: PoolField::CreateTimeoutMs,
                    op: AdjustOp::Scale(2.0),
                    clamp_min: 1_000,
                    clamp_max: 120_000,
                },
                Adjustment {
                    field: PoolField::AcquireTimeoutMs,
                    op: AdjustOp::Scale(2.0),
                    clamp_min: 1_000,
                    clamp_max: 120_000,
                },
                Adjustment {
                    field: PoolField::MinConnections,
                    op: AdjustOp::Offset(-1),
                    clamp_min: 1,
                    clamp_max: 10,
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tt_core::utc_now;

    fn snapshot(total_queries: u64, latency: f64, at_secs_ago: i64) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: utc_now() - chrono::Duration::seconds(at_secs_ago),
            connection_state: tt_conn::ConnectionState::Connected,
            uptime_ms: 100_000.0,
            total_queries,
            failed_queries: 0,
            success_rate: 100.0,
            avg_latency_ms: latency,
            reconnect_attempts: 0,
            memory_rss_bytes: 0,
            cpu_percent: 0.0,
        }
    }

    #[test]
    fn test_aggregate_averages_and_throughput() {
        let snapshots = vec![
            snapshot(100, 10.0, 20),
            snapshot(150, 20.0, 10),
            snapshot(200, 30.0, 0),
        ];
        let aggregates = aggregate(&snapshots);

        assert_eq!(aggregates.samples, 3);
        assert!((aggregates.avg_latency_ms - 20.0).abs() < 1e-9);
        // 100 queries over 20 seconds between first and last snapshot
        assert!((aggregates.throughput_qps - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_of_empty_window_is_zero() {
        let aggregates = aggregate(&[]);
        assert_eq!(aggregates.samples, 0);
        assert_eq!(aggregates.throughput_qps, 0.0);
    }

    #[test]
    fn test_any_predicate_triggers() {
        let trigger = TriggerConditions {
            max_avg_latency_ms: Some(500.0),
            min_throughput_qps: Some(1.0),
            ..TriggerConditions::default()
        };
        // Latency fine, throughput below the floor
        let window = WindowAggregates {
            samples: 5,
            avg_latency_ms: 100.0,
            throughput_qps: 0.2,
            ..WindowAggregates::default()
        };
        assert!(trigger.triggered(&window));

        // Both fine
        let window = WindowAggregates {
            samples: 5,
            avg_latency_ms: 100.0,
            throughput_qps: 10.0,
            ..WindowAggregates::default()
        };
        assert!(!trigger.triggered(&window));
    }

    #[test]
    fn test_absent_predicates_never_trigger() {
        let trigger = TriggerConditions::default();
        let window = WindowAggregates {
            samples: 100,
            avg_latency_ms: 99_999.0,
            failure_rate: 100.0,
            ..WindowAggregates::default()
        };
        assert!(!trigger.triggered(&window));
    }

    #[test]
    fn test_apply_strategy_offsets_and_clamps() {
        let strategy = OptimizationStrategy {
            name: "test".to_string(),
            description: String::new(),
            enabled: true,
            priority: 1,
            trigger: TriggerConditions::default(),
            actions: vec![Adjustment {
                field: PoolField::MaxConnections,
                op: AdjustOp::Offset(5),
                clamp_min: 1,
                clamp_max: 12,
            }],
        };
        let current = PoolSettings::default();
        let next = apply_strategy(&strategy, &current);

        assert_eq!(next.max_connections, 12, "clamped below the raw +5");
        // Untouched fields are preserved
        assert_eq!(next.acquire_timeout_ms, current.acquire_timeout_ms);
    }

    #[test]
    fn test_apply_strategy_scales_timeouts() {
        let strategy = OptimizationStrategy {
            name: "test".to_string(),
            description: String::new(),
            enabled: true,
            priority: 1,
            trigger: TriggerConditions::default(),
            actions: vec![Adjustment {
                field: PoolField::AcquireTimeoutMs,
                op: AdjustOp::Scale(1.5),
                clamp_min: 1_000,
                clamp_max: 60_000,
            }],
        };
        let next = apply_strategy(&strategy, &PoolSettings::default());
        assert_eq!(next.acquire_timeout_ms, 45_000);
    }

    #[test]
    fn test_apply_strategy_repairs_min_max_invariant() {
        let strategy = OptimizationStrategy {
            name: "test".to_string(),
            description: String::new(),
            enabled: true,
            priority: 1,
            trigger: TriggerConditions::default(),
            actions: vec![Adjustment {
                field: PoolField::MaxConnections,
                op: AdjustOp::Offset(-9),
                clamp_min: 1,
                clamp_max: 50,
            }],
        };
        let current = PoolSettings {
            min_connections: 2,
            max_connections: 10,
            ..PoolSettings::default()
        };
        let next = apply_strategy(&strategy, &current);
        assert_eq!(next.max_connections, 1);
        assert_eq!(next.min_connections, 1, "min lowered to preserve min <= max");
    }

    #[test]
    fn test_negative_offset_saturates_at_zero_before_clamp() {
        let strategy = OptimizationStrategy {
            name: "test".to_string(),
            description: String::new(),
            enabled: true,
            priority: 1,
            trigger: TriggerConditions::default(),
            actions: vec![Adjustment {
                field: PoolField::MinConnections,
                op: AdjustOp::Offset(-100),
                clamp_min: 1,
                clamp_max: 10,
            }],
        };
        let next = apply_strategy(&strategy, &PoolSettings::default());
        assert_eq!(next.min_connections, 1);
    }

    #[test]
    fn test_default_strategies_are_priority_ordered_and_enabled() {
        let strategies = default_strategies();
        assert_eq!(strategies.len(), 5);
        for pair in strategies.windows(2) {
            assert!(pair[0].priority < pair[1].priority);
        }
        assert!(strategies.iter().all(|s| s.enabled));
        assert_eq!(strategies[0].name, "high-latency");
        assert_eq!(strategies[4].name, "recovery");
    }
}
