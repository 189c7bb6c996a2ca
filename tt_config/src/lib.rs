//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Numeric defaults mirror the documented subsystem defaults

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use tt_core::{Error, Result};
use validator::Validate;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub database: DatabaseConfig,
    pub telemetry: TelemetryConfig,
    #[validate(nested)]
    pub pool: PoolConfig,
    #[validate(nested)]
    pub reconnection: ReconnectionConfig,
    #[validate(nested)]
    pub health: HealthConfig,
    #[validate(nested)]
    pub monitoring: MonitoringConfig,
    #[validate(nested)]
    pub optimizer: OptimizerConfig,
}

/// Database location
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "tether.db".to_string(),
        }
    }
}

/// Tracing output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub service: String,
    /// JSON log output for production deployments
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service: "tether".to_string(),
            json: false,
        }
    }
}

/// Connection pool bounds and timeouts
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PoolConfig {
    #[validate(range(min = 1, max = 100))]
    pub min_connections: u32,
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub create_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub destroy_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub idle_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub reap_interval_ms: u64,
    #[validate(range(min = 1))]
    pub create_retry_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout_ms: 30_000,
            create_timeout_ms: 30_000,
            destroy_timeout_ms: 5_000,
            idle_timeout_ms: 30_000,
            reap_interval_ms: 1_000,
            create_retry_interval_ms: 200,
        }
    }
}

/// Automatic reconnection parameters
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    #[validate(range(max = 1000))]
    pub max_retries: u32,
    #[validate(range(min = 1))]
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 10,
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ms: 1_000,
        }
    }
}

/// Health probe parameters
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HealthConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub interval_ms: u64,
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    #[validate(range(min = 1))]
    pub recovery_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }
}

/// Metrics sampling and alert thresholds
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct MonitoringConfig {
    #[validate(range(min = 1))]
    pub interval_ms: u64,
    #[validate(range(min = 1, max = 10000))]
    pub max_history: usize,
    #[validate(range(min = 1, max = 100000))]
    pub max_alert_history: usize,
    pub max_latency_ms: f64,
    /// Failure percentage (0-100) above which an alert fires
    pub max_failure_rate: f64,
    pub max_reconnect_attempts: u32,
    pub min_uptime_ms: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            max_history: 100,
            max_alert_history: 1_000,
            max_latency_ms: 1_000.0,
            max_failure_rate: 10.0,
            max_reconnect_attempts: 5,
            min_uptime_ms: 60_000.0,
        }
    }
}

/// Pool optimizer gating
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct OptimizerConfig {
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub cooldown_ms: u64,
    #[validate(range(min = 1, max = 10000))]
    pub max_history: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 300_000,
            max_history: 100,
        }
    }
}

impl Config {
    /// Load configuration from defaults, optional .env file, and
    /// `TETHER_` environment variables.
    ///
    /// Nested keys use a double-underscore separator because field
    /// names themselves contain underscores, e.g.
    /// `TETHER_POOL__MAX_CONNECTIONS=25`.
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        builder = builder
            .set_default("database.path", "tether.db")?
            .set_default("telemetry.service", "tether")?
            .set_default("telemetry.json", false)?
            .set_default("pool.min_connections", 2)?
            .set_default("pool.max_connections", 10)?
            .set_default("pool.acquire_timeout_ms", 30_000)?
            .set_default("pool.create_timeout_ms", 30_000)?
            .set_default("pool.destroy_timeout_ms", 5_000)?
            .set_default("pool.idle_timeout_ms", 30_000)?
            .set_default("pool.reap_interval_ms", 1_000)?
            .set_default("pool.create_retry_interval_ms", 200)?
            .set_default("reconnection.enabled", true)?
            .set_default("reconnection.max_retries", 10)?
            .set_default("reconnection.base_delay_ms", 1_000)?
            .set_default("reconnection.backoff_multiplier", 2.0)?
            .set_default("reconnection.max_delay_ms", 30_000)?
            .set_default("reconnection.jitter_ms", 1_000)?
            .set_default("health.enabled", true)?
            .set_default("health.interval_ms", 30_000)?
            .set_default("health.timeout_ms", 5_000)?
            .set_default("health.failure_threshold", 3)?
            .set_default("health.recovery_threshold", 2)?
            .set_default("monitoring.interval_ms", 30_000)?
            .set_default("monitoring.max_history", 100)?
            .set_default("monitoring.max_alert_history", 1_000)?
            .set_default("monitoring.max_latency_ms", 1_000.0)?
            .set_default("monitoring.max_failure_rate", 10.0)?
            .set_default("monitoring.max_reconnect_attempts", 5)?
            .set_default("monitoring.min_uptime_ms", 60_000.0)?
            .set_default("optimizer.enabled", true)?
            .set_default("optimizer.cooldown_ms", 300_000)?
            .set_default("optimizer.max_history", 100)?;

        // Try to load from .env file if it exists (optional)
        if std::path::Path::new(".env").exists() {
            builder = builder.add_source(File::with_name(".env").required(false));
        }

        // Environment variables win over everything else
        builder = builder.add_source(
            Environment::with_prefix("TETHER")
                .try_parsing(true)
                .separator("__"),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;
        parsed.validate_invariants()?;

        Ok(parsed)
    }

    /// Cross-field invariants the derive-based ranges cannot express
    fn validate_invariants(&self) -> Result<()> {
        if self.pool.min_connections > self.pool.max_connections {
            return Err(Error::Config(format!(
                "pool.min_connections ({}) must not exceed pool.max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }
        if self.reconnection.backoff_multiplier <= 1.0 {
            return Err(Error::Config(format!(
                "reconnection.backoff_multiplier must be greater than 1, got {}",
                self.reconnection.backoff_multiplier
            )));
        }
        if self.reconnection.base_delay_ms > self.reconnection.max_delay_ms {
            return Err(Error::Config(format!(
                "reconnection.base_delay_ms ({}) must not exceed reconnection.max_delay_ms ({})",
                self.reconnection.base_delay_ms, self.reconnection.max_delay_ms
            )));
        }
        if self.health.timeout_ms >= self.health.interval_ms {
            return Err(Error::Config(format!(
                "health.timeout_ms ({}) must be less than health.interval_ms ({})",
                self.health.timeout_ms, self.health.interval_ms
            )));
        }
        Ok(())
    }
}
