//! ABOUTME: Evaluation engine: pick a triggered strategy, commit the change
//! ABOUTME: Cooldown-gated; commit failures are recorded, never thrown

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tt_conn::{PoolConfigurator, PoolSettings};
use tt_core::{utc_now, Broadcast};
use tt_obs::{Alert, AlertLevel, MetricsHistory, MetricsSnapshot};

use crate::strategy::{
    aggregate, apply_strategy, default_strategies, OptimizationStrategy, WindowAggregates,
};

/// Optimizer configuration
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub enabled: bool,
    /// Minimum time between two applied optimizations
    pub cooldown_ms: u64,
    pub max_history: usize,
    pub strategies: Vec<OptimizationStrategy>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 300_000,
            max_history: 100,
            strategies: default_strategies(),
        }
    }
}

/// Record of one applied (or attempted) optimization
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub previous: PoolSettings,
    pub applied: PoolSettings,
    pub reason: String,
    pub snapshot: MetricsSnapshot,
    pub success: bool,
    pub error: Option<String>,
}

struct OptimizerTask {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Evaluates the strategy set against recent metrics and commits pool
/// changes through the manager.
///
/// Runs on every metrics sample, and immediately on Error/Critical
/// alerts. Evaluation serialises with the health checker on the
/// manager's maintenance lock and is skipped entirely inside the
/// cooldown window.
pub struct PoolOptimizer {
    configurator: Arc<dyn PoolConfigurator>,
    metrics: Arc<dyn MetricsHistory>,
    config: OptimizerConfig,
    last_optimization: Mutex<Option<Instant>>,
    history: RwLock<VecDeque<OptimizationResult>>,
    bus: Broadcast<OptimizationResult>,
    maintenance: Arc<tokio::sync::Mutex<()>>,
    task: Mutex<Option<OptimizerTask>>,
    // Handle to self for background task spawning
    self_ref: Weak<PoolOptimizer>,
}

impl PoolOptimizer {
    pub fn new(
        configurator: Arc<dyn PoolConfigurator>,
        metrics: Arc<dyn MetricsHistory>,
        maintenance: Arc<tokio::sync::Mutex<()>>,
        mut config: OptimizerConfig,
    ) -> Arc<Self> {
        config.strategies.sort_by_key(|s| s.priority);
        Arc::new_cyclic(|self_ref| Self {
            configurator,
            metrics,
            config,
            last_optimization: Mutex::new(None),
            history: RwLock::new(VecDeque::new()),
            bus: Broadcast::new(),
            maintenance,
            task: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Listen for metric samples and severe alerts
    pub fn start(
        &self,
        mut metrics_rx: broadcast::Receiver<MetricsSnapshot>,
        mut alerts_rx: broadcast::Receiver<Alert>,
    ) {
        let Some(optimizer) = self.self_ref.upgrade() else {
            return;
        };
        let mut slot = self.task.lock();
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut metrics_open = true;
            let mut alerts_open = true;
            loop {
                if !metrics_open && !alerts_open {
                    break;
                }
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    snapshot = metrics_rx.recv(), if metrics_open => {
                        match snapshot {
                            Ok(snapshot) => {
                                optimizer.evaluate(&snapshot).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                debug!(missed = missed, "Optimizer lagged behind metric samples");
                            }
                            Err(broadcast::error::RecvError::Closed) => metrics_open = false,
                        }
                    }
                    alert = alerts_rx.recv(), if alerts_open => {
                        match alert {
                            // Severe alerts trigger an immediate pass rather
                            // than waiting for the next sample.
                            Ok(alert) if alert.level >= AlertLevel::Error => {
                                optimizer.evaluate(&alert.snapshot).await;
                            }
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => alerts_open = false,
                        }
                    }
                }
            }
        });
        *slot = Some(OptimizerTask {
            token,
            _handle: handle,
        });
        info!(
            cooldown_ms = self.config.cooldown_ms,
            strategies = self.config.strategies.len(),
            "Pool optimizer started"
        );
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.token.cancel();
            info!("Pool optimizer stopped");
        }
    }

    /// Run one evaluation pass against the current metrics history.
    ///
    /// Returns the recorded result when a strategy changed the
    /// configuration, None when nothing applied.
    pub async fn evaluate(&self, snapshot: &MetricsSnapshot) -> Option<OptimizationResult> {
        if !self.config.enabled {
            return None;
        }
        let maintenance = Arc::clone(&self.maintenance);
        let _guard = maintenance.lock().await;

        {
            let last = self.last_optimization.lock();
            if let Some(at) = *last {
                let cooldown = Duration::from_millis(self.config.cooldown_ms);
                if at.elapsed() < cooldown {
                    debug!(
                        elapsed_ms = at.elapsed().as_millis() as u64,
                        cooldown_ms = self.config.cooldown_ms,
                        "Optimization skipped inside cooldown"
                    );
                    return None;
                }
            }
        }

        let history = self.metrics.recent_snapshots();
        let now = utc_now();
        let triggered = self
            .config
            .strategies
            .iter()
            .filter(|s| s.enabled)
            .find_map(|strategy| {
                let cutoff =
                    now - chrono::Duration::milliseconds(strategy.trigger.time_window_ms as i64);
                let windowed: Vec<MetricsSnapshot> = history
                    .iter()
                    .filter(|s| s.timestamp > cutoff)
                    .cloned()
                    .collect();
                if windowed.len() < strategy.trigger.min_metrics_count {
                    return None;
                }
                let aggregates = aggregate(&windowed);
                strategy
                    .trigger
                    .triggered(&aggregates)
                    .then(|| (strategy, aggregates))
            });

        let (strategy, aggregates) = triggered?;
        let previous = self.configurator.pool_settings();
        let proposed = apply_strategy(strategy, &previous);
        if proposed == previous {
            debug!(strategy = %strategy.name, "Strategy triggered but settings already at bounds");
            return None;
        }

        let commit = self.configurator.update_pool_settings(proposed.clone());
        let result = OptimizationResult {
            timestamp: now,
            strategy: strategy.name.clone(),
            previous,
            applied: proposed,
            reason: describe(strategy, &aggregates),
            snapshot: snapshot.clone(),
            success: commit.is_ok(),
            error: commit.as_ref().err().map(|e| e.to_string()),
        };
        match &commit {
            Ok(()) => info!(
                strategy = %result.strategy,
                reason = %result.reason,
                "Pool configuration optimized"
            ),
            Err(e) => warn!(
                strategy = %result.strategy,
                error = %e,
                "Optimization commit failed; recorded and skipped"
            ),
        }

        // The cooldown also covers failed commits so a persistent error
        // cannot retrigger every sample.
        *self.last_optimization.lock() = Some(Instant::now());
        {
            let mut history = self.history.write();
            history.push_back(result.clone());
            while history.len() > self.config.max_history {
                history.pop_front();
            }
        }
        self.bus.publish(result.clone());
        Some(result)
    }

    /// Optimization results retained, oldest first
    pub fn history(&self) -> Vec<OptimizationResult> {
        self.history.read().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OptimizationResult> {
        self.bus.subscribe()
    }
}

fn describe(strategy: &OptimizationStrategy, window: &WindowAggregates) -> String {
    format!(
        "{} (over {} samples: avg latency {:.0}ms, failure rate {:.1}%, {:.2} qps, cpu {:.1}%, rss {:.0} MiB, reconnects {:.1})",
        strategy.description,
        window.samples,
        window.avg_latency_ms,
        window.failure_rate,
        window.throughput_qps,
        window.avg_cpu_percent,
        window.avg_memory_bytes / (1024.0 * 1024.0),
        window.avg_reconnect_attempts,
    )
}
