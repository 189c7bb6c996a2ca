//! ABOUTME: Periodic health probe loop for the live connection
//! ABOUTME: Escalates repeated failures into the reconnection path

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::driver::Driver;
use crate::event::ConnectionEvent;
use crate::manager::ConnectionManager;
use crate::settings::HealthCheckConfig;
use crate::state::ConnectionState;

/// Health-check loop, spawned by the manager while connected.
///
/// Each tick races a cheap probe against the configured timeout and
/// publishes the boolean outcome. `failure_threshold` consecutive
/// failures escalate into the same connection-loss path a failed query
/// takes; `recovery_threshold` consecutive successes clear the failure
/// streak. The loop serialises with optimizer evaluation on the
/// manager's maintenance lock. Configuration changes restart the loop
/// with fresh settings.
pub(crate) async fn run<D: Driver>(
    manager: Arc<ConnectionManager<D>>,
    config: HealthCheckConfig,
    token: CancellationToken,
) {
    let interval = Duration::from_millis(config.interval_ms);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut consecutive_failures = 0u32;
    let mut consecutive_successes = 0u32;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if manager.state() != ConnectionState::Connected {
            continue;
        }

        let maintenance = manager.maintenance();
        let _guard = maintenance.lock().await;

        let outcome = manager.probe_current(timeout).await;
        let healthy = outcome.is_ok();
        manager.publish(ConnectionEvent::HealthCheck { healthy });

        if healthy {
            consecutive_successes += 1;
            if consecutive_successes >= config.recovery_threshold {
                if consecutive_failures > 0 {
                    debug!(
                        successes = consecutive_successes,
                        "Health recovered; clearing failure streak"
                    );
                }
                consecutive_failures = 0;
            }
        } else {
            consecutive_successes = 0;
            consecutive_failures += 1;
            let error = outcome.err().map(|e| e.to_string()).unwrap_or_default();
            warn!(
                failures = consecutive_failures,
                threshold = config.failure_threshold,
                error = %error,
                "Health probe failed"
            );
            if consecutive_failures >= config.failure_threshold {
                manager
                    .handle_connection_loss(&format!("health check failed: {}", error))
                    .await;
                // The loss handler stops this checker; a fresh one starts
                // after the connection is re-established.
                break;
            }
        }
    }
}
