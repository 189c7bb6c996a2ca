use std::process;
use std::sync::Arc;

use tt_conn::{
    ConnectionManager, HealthCheckConfig, ManagerConfig, PoolSettings, ReconnectionConfig,
    StatsSource,
};
use tt_core::telemetry;
use tt_db::SqliteDriver;
use tt_obs::{AlertThresholds, MetricsHistory, Monitor, MonitorConfig};
use tt_optim::{default_strategies, OptimizerConfig, PoolOptimizer};

#[tokio::main]
async fn main() {
    // Load configuration - exit with non-zero if invalid
    let config = match tt_config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    telemetry::init_tracing(&config.telemetry.service, config.telemetry.json);
    tracing::info!(db_path = %config.database.path, "tether starting");

    let manager_config = ManagerConfig {
        pool: PoolSettings {
            min_connections: config.pool.min_connections,
            max_connections: config.pool.max_connections,
            acquire_timeout_ms: config.pool.acquire_timeout_ms,
            create_timeout_ms: config.pool.create_timeout_ms,
            destroy_timeout_ms: config.pool.destroy_timeout_ms,
            idle_timeout_ms: config.pool.idle_timeout_ms,
            reap_interval_ms: config.pool.reap_interval_ms,
            create_retry_interval_ms: config.pool.create_retry_interval_ms,
        },
        reconnection: ReconnectionConfig {
            enabled: config.reconnection.enabled,
            max_retries: config.reconnection.max_retries,
            base_delay_ms: config.reconnection.base_delay_ms,
            backoff_multiplier: config.reconnection.backoff_multiplier,
            max_delay_ms: config.reconnection.max_delay_ms,
            jitter_ms: config.reconnection.jitter_ms,
        },
        health_check: HealthCheckConfig {
            enabled: config.health.enabled,
            interval_ms: config.health.interval_ms,
            timeout_ms: config.health.timeout_ms,
            failure_threshold: config.health.failure_threshold,
            recovery_threshold: config.health.recovery_threshold,
        },
    };

    let driver = SqliteDriver::new(config.database.path.clone());
    let manager = match ConnectionManager::new(driver, manager_config) {
        Ok(manager) => manager,
        Err(e) => {
            tracing::error!("Invalid manager configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = manager.connect().await {
        tracing::error!("Initial connect failed: {}", e);
        process::exit(1);
    }

    let stats: Arc<dyn StatsSource> = manager.clone();
    let monitor = Monitor::new(
        stats,
        MonitorConfig {
            interval_ms: config.monitoring.interval_ms,
            max_history: config.monitoring.max_history,
            max_alert_history: config.monitoring.max_alert_history,
            thresholds: AlertThresholds {
                max_latency_ms: config.monitoring.max_latency_ms,
                max_failure_rate: config.monitoring.max_failure_rate,
                max_reconnect_attempts: config.monitoring.max_reconnect_attempts,
                min_uptime_ms: config.monitoring.min_uptime_ms,
            },
        },
    );
    monitor.start(manager.subscribe());

    let metrics: Arc<dyn MetricsHistory> = monitor.clone();
    let optimizer = PoolOptimizer::new(
        manager.clone(),
        metrics,
        manager.maintenance(),
        OptimizerConfig {
            enabled: config.optimizer.enabled,
            cooldown_ms: config.optimizer.cooldown_ms,
            max_history: config.optimizer.max_history,
            strategies: default_strategies(),
        },
    );
    optimizer.start(monitor.subscribe_metrics(), monitor.subscribe_alerts());

    // Surface applied optimizations; alerts are already logged by the monitor
    let mut optimizations = optimizer.subscribe();
    tokio::spawn(async move {
        while let Ok(result) = optimizations.recv().await {
            tracing::info!(
                strategy = %result.strategy,
                success = result.success,
                reason = %result.reason,
                "Optimization recorded"
            );
        }
    });

    tracing::info!("tether running; press ctrl-c to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down");
    optimizer.stop();
    monitor.stop();
    manager.graceful_shutdown().await;
}
