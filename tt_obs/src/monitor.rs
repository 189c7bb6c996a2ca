//! ABOUTME: Periodic metrics sampling, threshold rules, and alert history
//! ABOUTME: Converts manager lifecycle events into alerts as they arrive

use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tt_conn::state::success_rate;
use tt_conn::{ConnectionEvent, ConnectionState, StatsSource};
use tt_core::{utc_now, Broadcast};

use crate::alert::{Alert, AlertLevel, ThresholdContext};
use crate::prom::ConnMetrics;
use crate::resources::{self, CpuTracker};
use crate::snapshot::MetricsSnapshot;

/// Threshold rules evaluated against each new snapshot
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_latency_ms: f64,
    /// Failure percentage (0-100) above which an Error alert fires
    pub max_failure_rate: f64,
    pub max_reconnect_attempts: u32,
    /// Connections younger than this while Connected are flagged as flapping
    pub min_uptime_ms: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_latency_ms: 1_000.0,
            max_failure_rate: 10.0,
            max_reconnect_attempts: 5,
            min_uptime_ms: 60_000.0,
        }
    }
}

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval_ms: u64,
    pub max_history: usize,
    pub max_alert_history: usize,
    pub thresholds: AlertThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_history: 100,
            max_alert_history: 1_000,
            thresholds: AlertThresholds::default(),
        }
    }
}

/// Aggregates over a trailing window of snapshots
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PerformanceStats {
    pub samples: usize,
    pub min_latency_ms: f64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Computed from the query-count delta across the window, not an
    /// average of per-sample rates
    pub success_rate: f64,
    /// Fraction of snapshots in the window whose state was Connected
    pub uptime_percentage: f64,
}

/// Read access to the snapshot history, the seam the optimizer
/// evaluates strategies through.
pub trait MetricsHistory: Send + Sync {
    fn recent_snapshots(&self) -> Vec<MetricsSnapshot>;
}

struct MonitorTask {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Samples connection stats and process resources on a fixed interval,
/// keeps a bounded snapshot history, and raises alerts from both
/// threshold rules and manager lifecycle events.
pub struct Monitor {
    stats: Arc<dyn StatsSource>,
    config: MonitorConfig,
    history: RwLock<VecDeque<MetricsSnapshot>>,
    alerts: RwLock<VecDeque<Alert>>,
    alert_bus: Broadcast<Alert>,
    metrics_bus: Broadcast<MetricsSnapshot>,
    cpu: Mutex<CpuTracker>,
    prom: ConnMetrics,
    task: Mutex<Option<MonitorTask>>,
    // Handle to self for background task spawning
    self_ref: Weak<Monitor>,
}

impl Monitor {
    pub fn new(stats: Arc<dyn StatsSource>, config: MonitorConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            stats,
            config,
            history: RwLock::new(VecDeque::new()),
            alerts: RwLock::new(VecDeque::new()),
            alert_bus: Broadcast::new(),
            metrics_bus: Broadcast::new(),
            cpu: Mutex::new(CpuTracker::new()),
            prom: ConnMetrics::new(),
            task: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// Start the sampling loop and the lifecycle-event listener
    pub fn start(&self, mut events: broadcast::Receiver<ConnectionEvent>) {
        let Some(monitor) = self.self_ref.upgrade() else {
            return;
        };
        let mut slot = self.task.lock();
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(monitor.config.interval_ms));
            let mut events_open = true;
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.sample_now();
                    }
                    event = events.recv(), if events_open => {
                        match event {
                            Ok(event) => monitor.observe_event(&event),
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(missed = missed, "Monitor lagged behind connection events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                events_open = false;
                            }
                        }
                    }
                }
            }
        });
        *slot = Some(MonitorTask {
            token,
            _handle: handle,
        });
        info!(interval_ms = self.config.interval_ms, "Monitor started");
    }

    /// Stop the background loops
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.token.cancel();
            info!("Monitor stopped");
        }
    }

    /// Build one snapshot now and run it through the pipeline
    pub fn sample_now(&self) -> MetricsSnapshot {
        let snapshot = self.build_snapshot();
        self.ingest(snapshot.clone());
        snapshot
    }

    /// Append a snapshot to history, publish it, and evaluate rules.
    ///
    /// Public so tests and embedders can drive the monitor without the
    /// interval timer.
    pub fn ingest(&self, snapshot: MetricsSnapshot) {
        {
            let mut history = self.history.write();
            history.push_back(snapshot.clone());
            while history.len() > self.config.max_history {
                history.pop_front();
            }
        }
        self.prom.observe_snapshot(&snapshot);
        self.metrics_bus.publish(snapshot.clone());

        for alert in self.evaluate_thresholds(&snapshot) {
            self.raise(alert);
        }
    }

    /// Apply the threshold rules to a single snapshot.
    ///
    /// Each rule is independent; several alerts can fire for one tick.
    pub fn evaluate_thresholds(&self, snapshot: &MetricsSnapshot) -> Vec<Alert> {
        let thresholds = &self.config.thresholds;
        let mut alerts = Vec::new();

        if snapshot.avg_latency_ms > thresholds.max_latency_ms {
            alerts.push(self.threshold_alert(
                AlertLevel::Warning,
                format!(
                    "Average query latency {:.0}ms exceeds {:.0}ms",
                    snapshot.avg_latency_ms, thresholds.max_latency_ms
                ),
                ThresholdContext {
                    name: "max_latency_ms".to_string(),
                    threshold: thresholds.max_latency_ms,
                    actual: snapshot.avg_latency_ms,
                },
                snapshot,
            ));
        }

        let failure_rate = snapshot.failure_rate();
        if failure_rate > thresholds.max_failure_rate {
            alerts.push(self.threshold_alert(
                AlertLevel::Error,
                format!(
                    "Query failure rate {:.1}% exceeds {:.1}%",
                    failure_rate, thresholds.max_failure_rate
                ),
                ThresholdContext {
                    name: "max_failure_rate".to_string(),
                    threshold: thresholds.max_failure_rate,
                    actual: failure_rate,
                },
                snapshot,
            ));
        }

        if snapshot.reconnect_attempts > thresholds.max_reconnect_attempts {
            alerts.push(self.threshold_alert(
                AlertLevel::Critical,
                format!(
                    "{} reconnect attempts exceed {}",
                    snapshot.reconnect_attempts, thresholds.max_reconnect_attempts
                ),
                ThresholdContext {
                    name: "max_reconnect_attempts".to_string(),
                    threshold: thresholds.max_reconnect_attempts as f64,
                    actual: snapshot.reconnect_attempts as f64,
                },
                snapshot,
            ));
        }

        if snapshot.connection_state == ConnectionState::Connected
            && snapshot.uptime_ms < thresholds.min_uptime_ms
        {
            alerts.push(self.threshold_alert(
                AlertLevel::Warning,
                format!(
                    "Connection uptime {:.0}ms below {:.0}ms; connection may be flapping",
                    snapshot.uptime_ms, thresholds.min_uptime_ms
                ),
                ThresholdContext {
                    name: "min_uptime_ms".to_string(),
                    threshold: thresholds.min_uptime_ms,
                    actual: snapshot.uptime_ms,
                },
                snapshot,
            ));
        }

        if matches!(
            snapshot.connection_state,
            ConnectionState::Failed | ConnectionState::Disconnected
        ) {
            alerts.push(Alert {
                level: AlertLevel::Critical,
                message: format!("Connection is {}", snapshot.connection_state),
                timestamp: utc_now(),
                snapshot: snapshot.clone(),
                threshold: None,
            });
        }

        alerts
    }

    /// Convert a lifecycle event into an alert and feed the counters
    pub fn observe_event(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::HealthCheck { healthy } => {
                self.prom.health_checks_total.inc();
                if !*healthy {
                    self.prom.health_check_failures_total.inc();
                }
            }
            ConnectionEvent::Reconnected => {
                self.prom.reconnects_total.inc();
            }
            ConnectionEvent::ConnectError { .. } => {
                self.prom.connect_errors_total.inc();
            }
            _ => {}
        }

        if let Some((level, message)) = describe_event(event) {
            let snapshot = self.latest_snapshot().unwrap_or_else(|| self.build_snapshot());
            self.raise(Alert {
                level,
                message,
                timestamp: utc_now(),
                snapshot,
                threshold: None,
            });
        }
    }

    /// Snapshots currently retained, oldest first
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        self.history.read().iter().cloned().collect()
    }

    /// Alerts currently retained, oldest first
    pub fn alert_history(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }

    pub fn latest_snapshot(&self) -> Option<MetricsSnapshot> {
        self.history.read().back().cloned()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_bus.subscribe()
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<MetricsSnapshot> {
        self.metrics_bus.subscribe()
    }

    /// Prometheus metric set fed by this monitor
    pub fn prometheus(&self) -> &ConnMetrics {
        &self.prom
    }

    /// Aggregate the snapshots newer than `now - window`.
    ///
    /// Latency aggregates skip zero-latency samples (no queries yet);
    /// the success rate uses the counter delta between the oldest and
    /// newest snapshot in the window.
    pub fn performance_stats(&self, window: Duration) -> PerformanceStats {
        let cutoff = utc_now() - chrono::Duration::milliseconds(window.as_millis() as i64);
        let history = self.history.read();
        let windowed: Vec<&MetricsSnapshot> =
            history.iter().filter(|s| s.timestamp > cutoff).collect();
        if windowed.is_empty() {
            return PerformanceStats::default();
        }

        let latencies: Vec<f64> = windowed
            .iter()
            .map(|s| s.avg_latency_ms)
            .filter(|l| *l > 0.0)
            .collect();
        let (min_latency_ms, avg_latency_ms, max_latency_ms) = if latencies.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: f64 = latencies.iter().sum();
            (
                latencies.iter().cloned().fold(f64::INFINITY, f64::min),
                sum / latencies.len() as f64,
                latencies.iter().cloned().fold(0.0, f64::max),
            )
        };

        let oldest = windowed[0];
        let newest = windowed[windowed.len() - 1];
        let delta_total = newest.total_queries.saturating_sub(oldest.total_queries);
        let delta_failed = newest.failed_queries.saturating_sub(oldest.failed_queries);
        let windowed_success_rate = success_rate(delta_total, delta_failed);

        let connected = windowed
            .iter()
            .filter(|s| s.connection_state == ConnectionState::Connected)
            .count();

        PerformanceStats {
            samples: windowed.len(),
            min_latency_ms,
            avg_latency_ms,
            max_latency_ms,
            success_rate: windowed_success_rate,
            uptime_percentage: connected as f64 / windowed.len() as f64 * 100.0,
        }
    }

    fn build_snapshot(&self) -> MetricsSnapshot {
        let stats = self.stats.connection_stats();
        let cpu_percent = self.cpu.lock().sample_percent();
        MetricsSnapshot {
            timestamp: utc_now(),
            connection_state: stats.state,
            uptime_ms: stats.uptime_ms,
            total_queries: stats.total_queries,
            failed_queries: stats.failed_queries,
            success_rate: stats.success_rate(),
            avg_latency_ms: stats.avg_latency_ms,
            reconnect_attempts: stats.reconnect_attempts,
            memory_rss_bytes: resources::rss_bytes(),
            cpu_percent,
        }
    }

    fn threshold_alert(
        &self,
        level: AlertLevel,
        message: String,
        context: ThresholdContext,
        snapshot: &MetricsSnapshot,
    ) -> Alert {
        Alert {
            level,
            message,
            timestamp: utc_now(),
            snapshot: snapshot.clone(),
            threshold: Some(context),
        }
    }

    fn raise(&self, alert: Alert) {
        match alert.level {
            AlertLevel::Info => info!(alert = %alert.message, "Alert raised"),
            AlertLevel::Warning => warn!(alert = %alert.message, "Alert raised"),
            AlertLevel::Error | AlertLevel::Critical => {
                error!(alert = %alert.message, level = %alert.level, "Alert raised")
            }
        }
        self.prom.alerts_total.inc();
        {
            let mut alerts = self.alerts.write();
            alerts.push_back(alert.clone());
            while alerts.len() > self.config.max_alert_history {
                alerts.pop_front();
            }
        }
        self.alert_bus.publish(alert);
    }
}

impl MetricsHistory for Monitor {
    fn recent_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.history()
    }
}

/// Alert level and message for lifecycle events that warrant one
fn describe_event(event: &ConnectionEvent) -> Option<(AlertLevel, String)> {
    match event {
        ConnectionEvent::Connected => {
            Some((AlertLevel::Info, "Database connection established".to_string()))
        }
        ConnectionEvent::Disconnected => {
            Some((AlertLevel::Warning, "Database connection lost".to_string()))
        }
        ConnectionEvent::Reconnecting { attempt, delay_ms } => Some((
            AlertLevel::Warning,
            format!("Reconnection attempt {} scheduled in {}ms", attempt, delay_ms),
        )),
        ConnectionEvent::Reconnected => {
            Some((AlertLevel::Info, "Database connection recovered".to_string()))
        }
        ConnectionEvent::ReconnectExhausted { attempts } => Some((
            AlertLevel::Critical,
            format!(
                "Reconnection abandoned after {} attempts; manual intervention required",
                attempts
            ),
        )),
        ConnectionEvent::ConnectError { message } => {
            Some((AlertLevel::Error, format!("Connect failed: {}", message)))
        }
        ConnectionEvent::QueryFailed {
            message,
            failed_queries,
            ..
        } => Some((
            AlertLevel::Error,
            format!("Query failed ({} total failures): {}", failed_queries, message),
        )),
        ConnectionEvent::HealthCheck { healthy: false } => {
            Some((AlertLevel::Warning, "Health check failed".to_string()))
        }
        ConnectionEvent::HealthCheck { healthy: true } => None,
        ConnectionEvent::StateChanged { from, to } => {
            debug!(from = %from, to = %to, "State change observed");
            None
        }
    }
}
