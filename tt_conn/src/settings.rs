//! ABOUTME: Pool, reconnection, and health-check configuration types
//! ABOUTME: Mutated only through the manager; invariants checked on update

use serde::{Deserialize, Serialize};
use tt_core::{Error, Result};

/// Connection pool configuration.
///
/// Changes take effect when the next client is established; the live
/// client is never resized in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub create_timeout_ms: u64,
    pub destroy_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub reap_interval_ms: u64,
    pub create_retry_interval_ms: u64,
}

impl Default for PoolSettings {
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

impl PoolSettings {
    pub fn validate(&self) -> Result<()> {
        if self.min_connections > self.max_connections {
            return Err(Error::Validation(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        let timeouts = [
            ("acquire_timeout_ms", self.acquire_timeout_ms),
            ("create_timeout_ms", self.create_timeout_ms),
            ("destroy_timeout_ms", self.destroy_timeout_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
            ("reap_interval_ms", self.reap_interval_ms),
            ("create_retry_interval_ms", self.create_retry_interval_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(Error::Validation(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }
}

/// Automatic reconnection policy parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
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

impl ReconnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier <= 1.0 {
            return Err(Error::Validation(format!(
                "backoff_multiplier must be greater than 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.base_delay_ms == 0 {
            return Err(Error::Validation("base_delay_ms must be positive".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Validation(format!(
                "base_delay_ms ({}) must not exceed max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Periodic health probe parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
}

impl Default for HealthCheckConfig {
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

impl HealthCheckConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 || self.interval_ms == 0 {
            return Err(Error::Validation(
                "health check interval and timeout must be positive".into(),
            ));
        }
        if self.timeout_ms >= self.interval_ms {
            return Err(Error::Validation(format!(
                "health check timeout_ms ({}) must be less than interval_ms ({})",
                self.timeout_ms, self.interval_ms
            )));
        }
        if self.failure_threshold == 0 || self.recovery_threshold == 0 {
            return Err(Error::Validation(
                "health check thresholds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Full manager configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub pool: PoolSettings,
    pub reconnection: ReconnectionConfig,
    pub health_check: HealthCheckConfig,
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.reconnection.validate()?;
        self.health_check.validate()?;
        Ok(())
    }
}

/// Partial configuration update; provided sections replace the current
/// ones wholesale, omitted sections are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub pool: Option<PoolSettings>,
    pub reconnection: Option<ReconnectionConfig>,
    pub health_check: Option<HealthCheckConfig>,
}

impl ConfigUpdate {
    pub fn validate(&self) -> Result<()> {
        if let Some(pool) = &self.pool {
            pool.validate()?;
        }
        if let Some(reconnection) = &self.reconnection {
            reconnection.validate()?;
        }
        if let Some(health_check) = &self.health_check {
            health_check.validate()?;
        }
        Ok(())
    }
}

/// Seam through which the optimizer reads and commits pool settings
/// without being generic over the driver.
pub trait PoolConfigurator: Send + Sync {
    fn pool_settings(&self) -> PoolSettings;
    fn update_pool_settings(&self, settings: PoolSettings) -> tt_core::Result<()>;
}
