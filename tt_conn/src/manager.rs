//! ABOUTME: Connection state machine and instrumented query facade
//! ABOUTME: Single mutation point for state, stats, and configuration

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tt_core::time::millis_between;
use tt_core::{utc_now, Broadcast, Error, LatencyTimer, Result};

use crate::backoff::ReconnectionPolicy;
use crate::classify::is_connection_error;
use crate::driver::Driver;
use crate::event::ConnectionEvent;
use crate::health;
use crate::settings::{ConfigUpdate, ManagerConfig, PoolConfigurator, PoolSettings};
use crate::state::{
    fold_latency_ema, ConnectionState, ConnectionStats, DetailedStats, QueryPerformance,
    StatsSource,
};

/// Bounded wait for in-flight queries during graceful shutdown
const QUERY_DRAIN_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct StatsInner {
    state: StateField,
    connected_at: Option<chrono::DateTime<chrono::Utc>>,
    last_error: Option<String>,
    reconnect_attempts: u32,
    total_queries: u64,
    failed_queries: u64,
    avg_latency_ms: f64,
}

/// Wrapper so `StatsInner` can derive Default with Disconnected
#[derive(Debug)]
struct StateField(ConnectionState);

impl Default for StateField {
    fn default() -> Self {
        Self(ConnectionState::Disconnected)
    }
}

struct TaskHandle {
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TaskHandle {
    fn cancel(self) {
        self.token.cancel();
    }
}

/// Owns the single logical connection to the database.
///
/// The manager drives the lifecycle state machine, classifies query
/// failures, schedules reconnection with backoff, and runs the
/// periodic health checker. It is cheap to share behind an `Arc` and
/// safe for any number of concurrent callers.
pub struct ConnectionManager<D: Driver> {
    driver: Arc<D>,
    client: tokio::sync::RwLock<Option<Arc<D::Client>>>,
    stats: RwLock<StatsInner>,
    settings: RwLock<ManagerConfig>,
    events: Broadcast<ConnectionEvent>,
    reconnect_task: Mutex<Option<TaskHandle>>,
    health_task: Mutex<Option<TaskHandle>>,
    in_flight: AtomicU64,
    maintenance: Arc<tokio::sync::Mutex<()>>,
    // Handle to self for background task spawning
    self_ref: Weak<ConnectionManager<D>>,
}

impl<D: Driver> ConnectionManager<D> {
    /// Create a manager; the driver is not contacted until `connect()`
    pub fn new(driver: D, config: ManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new_cyclic(|self_ref| Self {
            driver: Arc::new(driver),
            client: tokio::sync::RwLock::new(None),
            stats: RwLock::new(StatsInner::default()),
            settings: RwLock::new(config),
            events: Broadcast::new(),
            reconnect_task: Mutex::new(None),
            health_task: Mutex::new(None),
            in_flight: AtomicU64::new(0),
            maintenance: Arc::new(tokio::sync::Mutex::new(())),
            self_ref: self_ref.clone(),
        }))
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.stats.read().state.0
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Owned snapshot of the manager's counters
    pub fn connection_stats(&self) -> ConnectionStats {
        let stats = self.stats.read();
        let uptime_ms = stats
            .connected_at
            .map(|at| millis_between(at, utc_now()))
            .unwrap_or(0.0);
        ConnectionStats {
            state: stats.state.0,
            connected_at: stats.connected_at,
            last_error: stats.last_error.clone(),
            reconnect_attempts: stats.reconnect_attempts,
            total_queries: stats.total_queries,
            failed_queries: stats.failed_queries,
            avg_latency_ms: stats.avg_latency_ms,
            uptime_ms,
        }
    }

    /// Stats plus configuration and derived query performance
    pub fn detailed_stats(&self) -> DetailedStats {
        let stats = self.connection_stats();
        let performance = QueryPerformance {
            total_queries: stats.total_queries,
            failed_queries: stats.failed_queries,
            success_rate: stats.success_rate(),
            avg_latency_ms: stats.avg_latency_ms,
        };
        DetailedStats {
            stats,
            configuration: self.config(),
            performance,
        }
    }

    /// Clone of the live configuration
    pub fn config(&self) -> ManagerConfig {
        self.settings.read().clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Lock shared by the health checker and the optimizer so their
    /// periodic work never overlaps.
    pub fn maintenance(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.maintenance)
    }

    /// Establish the connection.
    ///
    /// No-op while already connected or while a connect/reconnect is in
    /// progress. A failed attempt leaves the state at `Failed` and
    /// returns the error; automatic reconnection is not scheduled for
    /// an explicit connect that never succeeded.
    pub async fn connect(&self) -> Result<()> {
        let from = {
            let mut stats = self.stats.write();
            match stats.state.0 {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting | ConnectionState::Reconnecting => return Ok(()),
                other => {
                    stats.state = StateField(ConnectionState::Connecting);
                    other
                }
            }
        };
        self.events.publish(ConnectionEvent::StateChanged {
            from,
            to: ConnectionState::Connecting,
        });

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stats.write().last_error = Some(e.to_string());
                self.set_state(ConnectionState::Failed);
                self.events.publish(ConnectionEvent::ConnectError {
                    message: e.to_string(),
                });
                error!(error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// Tear down and immediately re-establish the connection
    pub async fn reconnect(&self) -> Result<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Disconnect from any state.
    ///
    /// Cancels pending reconnection and health-check tasks and releases
    /// the client. In-flight queries are not interrupted.
    pub async fn disconnect(&self) {
        self.cancel_reconnect();
        self.stop_health_checker();
        self.set_state(ConnectionState::Disconnected);
        self.teardown_client().await;
        self.events.publish(ConnectionEvent::Disconnected);
        info!("Disconnected");
    }

    /// Wait (bounded) for in-flight queries to drain, then disconnect
    pub async fn graceful_shutdown(&self) {
        info!("Graceful shutdown requested");
        let deadline = Instant::now() + QUERY_DRAIN_WINDOW;
        while self.in_flight.load(Ordering::Acquire) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let remaining = self.in_flight.load(Ordering::Acquire);
        if remaining > 0 {
            warn!(in_flight = remaining, "Drain window elapsed; disconnecting anyway");
        }
        self.disconnect().await;
    }

    /// Disconnect and clear all counters back to their initial values
    pub async fn reset(&self) {
        self.disconnect().await;
        *self.stats.write() = StatsInner::default();
        info!("Connection stats reset");
    }

    /// Run `work` against the live client.
    ///
    /// Fails fast when not connected. Successful calls feed the latency
    /// EMA; failures are published, and connection-class failures
    /// additionally trigger the reconnection path. The original error
    /// is always returned to the caller.
    pub async fn execute<T, F>(&self, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c D::Client) -> BoxFuture<'c, Result<T>> + Send,
    {
        let client = {
            let guard = self.client.read().await;
            let connected = self.state() == ConnectionState::Connected;
            match (guard.as_ref(), connected) {
                (Some(client), true) => Arc::clone(client),
                _ => {
                    return Err(Error::Connection(format!(
                        "cannot execute query while {}",
                        self.state()
                    )))
                }
            }
        };

        let _in_flight = InFlightGuard::enter(&self.in_flight);
        let timer = LatencyTimer::start();
        let result = work(client.as_ref()).await;
        let elapsed_ms = timer.elapsed_ms();

        match result {
            Ok(value) => {
                let mut stats = self.stats.write();
                stats.total_queries += 1;
                stats.avg_latency_ms = fold_latency_ema(stats.avg_latency_ms, elapsed_ms);
                Ok(value)
            }
            Err(e) => {
                let message = e.to_string();
                let failed_queries = {
                    let mut stats = self.stats.write();
                    stats.total_queries += 1;
                    stats.failed_queries += 1;
                    stats.failed_queries
                };
                self.events.publish(ConnectionEvent::QueryFailed {
                    message: message.clone(),
                    failed_queries,
                    at: utc_now(),
                });
                if is_connection_error(&message) {
                    if let Some(manager) = self.self_ref.upgrade() {
                        tokio::spawn(async move {
                            manager.handle_connection_loss(&message).await;
                        });
                    }
                }
                Err(e)
            }
        }
    }

    /// Merge a partial configuration update over the current one.
    ///
    /// The health checker restarts when its section is replaced so new
    /// interval/timeout values take effect immediately.
    pub fn update_config(&self, update: ConfigUpdate) -> Result<()> {
        update.validate()?;
        let health_changed = update.health_check.is_some();
        {
            let mut config = self.settings.write();
            if let Some(pool) = update.pool {
                config.pool = pool;
            }
            if let Some(reconnection) = update.reconnection {
                config.reconnection = reconnection;
            }
            if let Some(health_check) = update.health_check {
                config.health_check = health_check;
            }
        }
        info!("Configuration updated");
        if health_changed {
            self.stop_health_checker();
            if self.is_connected() {
                self.start_health_checker();
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    pub(crate) fn publish(&self, event: ConnectionEvent) {
        self.events.publish(event);
    }

    /// Probe the live client, bounded by `timeout`
    pub(crate) async fn probe_current(&self, timeout: Duration) -> Result<()> {
        let client = {
            let guard = self.client.read().await;
            guard
                .as_ref()
                .map(Arc::clone)
                .ok_or_else(|| Error::Connection("no live client".to_string()))?
        };
        match tokio::time::timeout(timeout, self.driver.probe(&client)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "health probe after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// React to evidence that the link is broken.
    ///
    /// Only the first caller observes `Connected` and performs the
    /// transition; concurrent detections become no-ops.
    pub(crate) async fn handle_connection_loss(&self, reason: &str) {
        {
            let mut stats = self.stats.write();
            if stats.state.0 != ConnectionState::Connected {
                return;
            }
            stats.state = StateField(ConnectionState::Disconnected);
            stats.connected_at = None;
            stats.reconnect_attempts = 0;
            stats.last_error = Some(reason.to_string());
        }
        warn!(reason = %reason, "Connection lost");
        self.events.publish(ConnectionEvent::StateChanged {
            from: ConnectionState::Connected,
            to: ConnectionState::Disconnected,
        });
        self.events.publish(ConnectionEvent::Disconnected);
        self.stop_health_checker();
        self.teardown_client().await;

        let enabled = self.settings.read().reconnection.enabled;
        if enabled {
            self.spawn_reconnect();
        }
    }

    /// Connect the driver, validate with a probe, and mark Connected
    async fn establish(&self) -> Result<()> {
        let (pool, probe_timeout) = {
            let config = self.settings.read();
            (
                config.pool.clone(),
                Duration::from_millis(config.health_check.timeout_ms),
            )
        };
        let create_timeout = Duration::from_millis(pool.create_timeout_ms);

        // A fresh client per attempt; stale handles are never reused.
        self.teardown_client().await;

        let client = match tokio::time::timeout(create_timeout, self.driver.connect(&pool)).await
        {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "driver connect after {}ms",
                    create_timeout.as_millis()
                )))
            }
        };

        // Validation probe separates "socket established" from "usable".
        let probe = match tokio::time::timeout(probe_timeout, self.driver.probe(&client)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "validation probe after {}ms",
                probe_timeout.as_millis()
            ))),
        };
        if let Err(e) = probe {
            let destroy = Duration::from_millis(pool.destroy_timeout_ms);
            let _ = tokio::time::timeout(destroy, self.driver.disconnect(&client)).await;
            return Err(e);
        }

        *self.client.write().await = Some(Arc::new(client));

        let from = {
            let mut stats = self.stats.write();
            let from = stats.state.0;
            stats.state = StateField(ConnectionState::Connected);
            stats.connected_at = Some(utc_now());
            stats.reconnect_attempts = 0;
            stats.last_error = None;
            from
        };
        if from != ConnectionState::Connected {
            self.events.publish(ConnectionEvent::StateChanged {
                from,
                to: ConnectionState::Connected,
            });
        }
        self.events.publish(ConnectionEvent::Connected);
        info!("Connection established and validated");

        self.start_health_checker();
        Ok(())
    }

    fn set_state(&self, to: ConnectionState) {
        let from = {
            let mut stats = self.stats.write();
            if stats.state.0 == to {
                return;
            }
            let from = stats.state.0;
            stats.state = StateField(to);
            if to != ConnectionState::Connected {
                stats.connected_at = None;
            }
            if to == ConnectionState::Disconnected {
                stats.reconnect_attempts = 0;
            }
            from
        };
        debug!(from = %from, to = %to, "Connection state changed");
        self.events.publish(ConnectionEvent::StateChanged { from, to });
    }

    async fn teardown_client(&self) {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            let destroy =
                Duration::from_millis(self.settings.read().pool.destroy_timeout_ms);
            match tokio::time::timeout(destroy, self.driver.disconnect(&client)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Client teardown reported an error"),
                Err(_) => warn!(
                    timeout_ms = destroy.as_millis() as u64,
                    "Client teardown timed out"
                ),
            }
        }
    }

    /// Schedule the reconnect loop; at most one may be pending
    fn spawn_reconnect(&self) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let mut slot = self.reconnect_task.lock();
        if slot.is_some() {
            return;
        }
        self.set_state(ConnectionState::Reconnecting);
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            manager.reconnect_loop(task_token).await;
        });
        *slot = Some(TaskHandle {
            token,
            _handle: handle,
        });
    }

    async fn reconnect_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let (attempt, config) = {
                let stats = self.stats.read();
                (
                    stats.reconnect_attempts,
                    self.settings.read().reconnection.clone(),
                )
            };
            if attempt >= config.max_retries {
                self.set_state(ConnectionState::Failed);
                self.events
                    .publish(ConnectionEvent::ReconnectExhausted { attempts: attempt });
                error!(
                    attempts = attempt,
                    "Reconnection attempts exhausted; manual connect required"
                );
                break;
            }

            let delay = ReconnectionPolicy::new(config).delay(attempt);
            self.events.publish(ConnectionEvent::Reconnecting {
                attempt: attempt + 1,
                delay_ms: delay.as_millis() as u64,
            });
            info!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnection attempt"
            );
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            self.stats.write().reconnect_attempts += 1;
            match self.establish().await {
                Ok(()) => {
                    if token.is_cancelled() {
                        // disconnect() raced the attempt; drop the fresh client
                        self.teardown_client().await;
                        self.set_state(ConnectionState::Disconnected);
                    } else {
                        self.events.publish(ConnectionEvent::Reconnected);
                        info!(attempts = attempt + 1, "Reconnected");
                    }
                    break;
                }
                Err(e) => {
                    self.stats.write().last_error = Some(e.to_string());
                    warn!(attempt = attempt + 1, error = %e, "Reconnection attempt failed");
                }
            }
        }
        *self.reconnect_task.lock() = None;
    }

    fn cancel_reconnect(&self) {
        if let Some(task) = self.reconnect_task.lock().take() {
            task.cancel();
        }
    }

    fn start_health_checker(&self) {
        let config = self.settings.read().health_check.clone();
        if !config.enabled {
            return;
        }
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };
        let mut slot = self.health_task.lock();
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            health::run(manager, config, task_token).await;
        });
        *slot = Some(TaskHandle {
            token,
            _handle: handle,
        });
    }

    fn stop_health_checker(&self) {
        if let Some(task) = self.health_task.lock().take() {
            task.cancel();
        }
    }
}

impl<D: Driver> StatsSource for ConnectionManager<D> {
    fn connection_stats(&self) -> ConnectionStats {
        ConnectionManager::connection_stats(self)
    }
}

impl<D: Driver> PoolConfigurator for ConnectionManager<D> {
    fn pool_settings(&self) -> PoolSettings {
        self.settings.read().pool.clone()
    }

    fn update_pool_settings(&self, settings: PoolSettings) -> Result<()> {
        settings.validate()?;
        self.settings.write().pool = settings;
        info!("Pool settings updated; applied at next client establishment");
        Ok(())
    }
}

struct InFlightGuard<'a> {
    counter: &'a AtomicU64,
}

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self { counter }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_inner_defaults_to_disconnected() {
        let inner = StatsInner::default();
        assert_eq!(inner.state.0, ConnectionState::Disconnected);
        assert_eq!(inner.reconnect_attempts, 0);
        assert_eq!(inner.total_queries, 0);
    }

    #[test]
    fn test_in_flight_guard_balances_counter() {
        let counter = AtomicU64::new(0);
        {
            let _a = InFlightGuard::enter(&counter);
            let _b = InFlightGuard::enter(&counter);
            assert_eq!(counter.load(Ordering::Acquire), 2);
        }
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }
}
