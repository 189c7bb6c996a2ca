use std::sync::Once;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing - safe to call multiple times
///
/// `json` selects the machine-readable output used in production
/// deployments; the pretty format is for interactive use.
pub fn init_tracing(service: &str, json: bool) {
    INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        if json {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().json())
                .with(env_filter)
                .init();
        } else {
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().pretty())
                .with(env_filter)
                .init();
        }

        tracing::info!(service = %service, "Tracing initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_idempotent() {
        // Should not panic when called multiple times
        init_tracing("tether-test", false);
        init_tracing("tether-test", true);
    }
}
