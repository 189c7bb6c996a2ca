//! ABOUTME: Observability for the connection manager: metrics and alerts
//! ABOUTME: Periodic sampling, threshold rules, bounded histories

pub mod alert;
pub mod monitor;
pub mod prom;
pub mod resources;
pub mod snapshot;

pub use alert::{Alert, AlertLevel, ThresholdContext};
pub use monitor::{AlertThresholds, MetricsHistory, Monitor, MonitorConfig, PerformanceStats};
pub use prom::ConnMetrics;
pub use snapshot::MetricsSnapshot;
