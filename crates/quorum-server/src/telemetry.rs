//! Telemetry and logging setup

use crate::error::{ServerError, ServerResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup the tracing subscriber. Safe to call more than once; only the
/// first call installs a subscriber.
pub fn setup_telemetry(log_level: &str) -> ServerResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_err()
    {
        // Another subscriber won the installation race; keep it.
        return Ok(());
    }

    tracing::info!("Telemetry initialized with log level: {log_level}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        assert!(setup_telemetry("info").is_ok());
        assert!(setup_telemetry("debug").is_ok());
    }
}
