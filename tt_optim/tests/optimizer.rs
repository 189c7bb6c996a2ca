//! ABOUTME: Behavioral tests for the optimizer evaluation engine
//! ABOUTME: Fake configurator and metrics history; no timers involved

use std::sync::Arc;

use parking_lot::Mutex;

use tt_conn::{ConnectionState, PoolConfigurator, PoolSettings};
use tt_core::{utc_now, Error, Result};
use tt_obs::{MetricsHistory, MetricsSnapshot};
use tt_optim::{
    AdjustOp, Adjustment, OptimizationStrategy, OptimizerConfig, PoolField, PoolOptimizer,
    TriggerConditions,
};

struct FakeConfigurator {
    settings: Mutex<PoolSettings>,
    fail_commits: Mutex<bool>,
    commits: Mutex<u32>,
}

impl FakeConfigurator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            settings: Mutex::new(PoolSettings::default()),
            fail_commits: Mutex::new(false),
            commits: Mutex::new(0),
        })
    }
}

impl PoolConfigurator for FakeConfigurator {
    fn pool_settings(&self) -> PoolSettings {
        self.settings.lock().clone()
    }

    fn update_pool_settings(&self, settings: PoolSettings) -> Result<()> {
        if *self.fail_commits.lock() {
            return Err(Error::Config("commit rejected".to_string()));
        }
        *self.commits.lock() += 1;
        *self.settings.lock() = settings;
        Ok(())
    }
}

struct FakeHistory {
    snapshots: Mutex<Vec<MetricsSnapshot>>,
}

impl FakeHistory {
    fn new(snapshots: Vec<MetricsSnapshot>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots),
        })
    }
}

impl MetricsHistory for FakeHistory {
    fn recent_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.snapshots.lock().clone()
    }
}

fn slow_snapshot(secs_ago: i64) -> MetricsSnapshot {
    MetricsSnapshot {
        timestamp: utc_now() - chrono::Duration::seconds(secs_ago),
        connection_state: ConnectionState::Connected,
        uptime_ms: 600_000.0,
        total_queries: 1_000,
        failed_queries: 0,
        success_rate: 100.0,
        avg_latency_ms: 900.0,
        reconnect_attempts: 0,
        memory_rss_bytes: 0,
        cpu_percent: 0.0,
    }
}

fn latency_strategy(priority: u32, offset: i64) -> OptimizationStrategy {
    OptimizationStrategy {
        name: format!("latency-p{}", priority),
        description: "raise ceiling".to_string(),
        enabled: true,
        priority,
        trigger: TriggerConditions {
            time_window_ms: 300_000,
            min_metrics_count: 2,
            max_avg_latency_ms: Some(500.0),
            ..TriggerConditions::default()
        },
        actions: vec![Adjustment {
            field: PoolField::MaxConnections,
            op: AdjustOp::Offset(offset),
            clamp_min: 1,
            clamp_max: 50,
        }],
    }
}

fn optimizer_with(
    configurator: Arc<FakeConfigurator>,
    history: Arc<FakeHistory>,
    strategies: Vec<OptimizationStrategy>,
) -> Arc<PoolOptimizer> {
    PoolOptimizer::new(
        configurator,
        history,
        Arc::new(tokio::sync::Mutex::new(())),
        OptimizerConfig {
            enabled: true,
            cooldown_ms: 300_000,
            max_history: 100,
            strategies,
        },
    )
}

#[tokio::test]
async fn triggered_strategy_commits_and_records() {
    let configurator = FakeConfigurator::new();
    let history = FakeHistory::new(vec![slow_snapshot(60), slow_snapshot(30), slow_snapshot(0)]);
    let optimizer = optimizer_with(
        configurator.clone(),
        history,
        vec![latency_strategy(1, 5)],
    );
    let mut results = optimizer.subscribe();

    let result = optimizer.evaluate(&slow_snapshot(0)).await;

    let result = result.expect("strategy should apply");
    assert!(result.success);
    assert_eq!(result.strategy, "latency-p1");
    assert_eq!(result.previous.max_connections, 10);
    assert_eq!(result.applied.max_connections, 15);
    assert_eq!(configurator.pool_settings().max_connections, 15);
    assert_eq!(optimizer.history().len(), 1);
    assert!(results.try_recv().is_ok(), "result published on the bus");
}

#[tokio::test]
async fn cooldown_limits_to_one_result() {
    let configurator = FakeConfigurator::new();
    let history = FakeHistory::new(vec![slow_snapshot(60), slow_snapshot(30), slow_snapshot(0)]);
    let optimizer = optimizer_with(
        configurator.clone(),
        history,
        vec![latency_strategy(1, 5)],
    );

    let first = optimizer.evaluate(&slow_snapshot(0)).await;
    let second = optimizer.evaluate(&slow_snapshot(0)).await;

    assert!(first.is_some());
    assert!(second.is_none(), "second tick falls inside the cooldown");
    assert_eq!(optimizer.history().len(), 1);
    assert_eq!(*configurator.commits.lock(), 1);
}

#[tokio::test]
async fn too_few_samples_skips_the_strategy() {
    let configurator = FakeConfigurator::new();
    let history = FakeHistory::new(vec![slow_snapshot(0)]);
    let optimizer = optimizer_with(configurator, history, vec![latency_strategy(1, 5)]);

    assert!(optimizer.evaluate(&slow_snapshot(0)).await.is_none());
}

#[tokio::test]
async fn snapshots_outside_the_window_do_not_count() {
    let configurator = FakeConfigurator::new();
    // Plenty of samples, all stale
    let history = FakeHistory::new(vec![
        slow_snapshot(4_000),
        slow_snapshot(3_600),
        slow_snapshot(3_200),
    ]);
    let optimizer = optimizer_with(configurator, history, vec![latency_strategy(1, 5)]);

    assert!(optimizer.evaluate(&slow_snapshot(0)).await.is_none());
}

#[tokio::test]
async fn disabled_strategies_are_ignored() {
    let configurator = FakeConfigurator::new();
    let history = FakeHistory::new(vec![slow_snapshot(30), slow_snapshot(0)]);
    let mut strategy = latency_strategy(1, 5);
    strategy.enabled = false;
    let optimizer = optimizer_with(configurator, history, vec![strategy]);

    assert!(optimizer.evaluate(&slow_snapshot(0)).await.is_none());
}

#[tokio::test]
async fn lowest_priority_number_wins_among_triggered() {
    let configurator = FakeConfigurator::new();
    let history = FakeHistory::new(vec![slow_snapshot(30), slow_snapshot(0)]);
    // Registered out of order; both trigger on the same window
    let optimizer = optimizer_with(
        configurator.clone(),
        history,
        vec![latency_strategy(7, 1), latency_strategy(2, 5)],
    );

    let result = optimizer.evaluate(&slow_snapshot(0)).await.unwrap();

    assert_eq!(result.strategy, "latency-p2");
    assert_eq!(configurator.pool_settings().max_connections, 15);
}

#[tokio::test]
async fn unchanged_configuration_records_nothing() {
    let configurator = FakeConfigurator::new();
    // Ceiling already at the clamp; the offset is a no-op
    configurator.settings.lock().max_connections = 50;
    let history = FakeHistory::new(vec![slow_snapshot(30), slow_snapshot(0)]);
    let optimizer = optimizer_with(configurator.clone(), history, vec![latency_strategy(1, 5)]);

    assert!(optimizer.evaluate(&slow_snapshot(0)).await.is_none());
    assert!(optimizer.history().is_empty());
    assert_eq!(*configurator.commits.lock(), 0);
}

#[tokio::test]
async fn commit_failure_is_recorded_not_thrown() {
    let configurator = FakeConfigurator::new();
    *configurator.fail_commits.lock() = true;
    let history = FakeHistory::new(vec![slow_snapshot(30), slow_snapshot(0)]);
    let optimizer = optimizer_with(configurator.clone(), history, vec![latency_strategy(1, 5)]);

    let result = optimizer.evaluate(&slow_snapshot(0)).await.unwrap();

    assert!(!result.success);
    assert!(result.error.as_ref().unwrap().contains("commit rejected"));
    // The failed attempt still starts the cooldown
    assert!(optimizer.evaluate(&slow_snapshot(0)).await.is_none());
    // And the live settings were never touched
    assert_eq!(configurator.pool_settings(), PoolSettings::default());
}

#[tokio::test]
async fn disabled_optimizer_never_evaluates() {
    let configurator = FakeConfigurator::new();
    let history = FakeHistory::new(vec![slow_snapshot(30), slow_snapshot(0)]);
    let optimizer = PoolOptimizer::new(
        configurator,
        history,
        Arc::new(tokio::sync::Mutex::new(())),
        OptimizerConfig {
            enabled: false,
            ..OptimizerConfig::default()
        },
    );

    assert!(optimizer.evaluate(&slow_snapshot(0)).await.is_none());
}
