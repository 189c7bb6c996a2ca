//! ABOUTME: Lifecycle events published by the connection manager
//! ABOUTME: Consumed by the monitor for alerting and by external callers

use chrono::{DateTime, Utc};

use crate::state::ConnectionState;

/// Notification published on the manager's broadcast channel.
///
/// `StateChanged` fires on every transition; the named lifecycle
/// variants carry the detail the monitor turns into alerts.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Connected,
    Disconnected,
    Reconnecting {
        attempt: u32,
        delay_ms: u64,
    },
    Reconnected,
    ReconnectExhausted {
        attempts: u32,
    },
    HealthCheck {
        healthy: bool,
    },
    QueryFailed {
        message: String,
        failed_queries: u64,
        at: DateTime<Utc>,
    },
    ConnectError {
        message: String,
    },
}
