//! ABOUTME: Core error type, time helpers, tracing init, and event bus
//! ABOUTME: Foundation crate used by all other tether components

pub mod bus;
pub mod error;
pub mod telemetry;
pub mod time;

pub use bus::Broadcast;
pub use error::{Error, Result};
pub use time::{utc_now, LatencyTimer};
