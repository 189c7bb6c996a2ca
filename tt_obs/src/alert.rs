//! ABOUTME: Alert levels and the alert record raised by the monitor
//! ABOUTME: Alerts carry the snapshot that triggered them

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::snapshot::MetricsSnapshot;

/// Severity of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// The threshold a rule-based alert breached
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdContext {
    pub name: String,
    pub threshold: f64,
    pub actual: f64,
}

/// A raised alert, appended to the bounded alert history
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub snapshot: MetricsSnapshot,
    /// Present for threshold-rule alerts, absent for lifecycle alerts
    pub threshold: Option<ThresholdContext>,
}
