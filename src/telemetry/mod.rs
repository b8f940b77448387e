//! Tracing subscriber setup.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the default passed
//! in. Debug query logs are emitted under the `pg_handle::query` target, so
//! `RUST_LOG=pg_handle::query=info` shows only those.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global tracing subscriber.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
    }

    tracing::info!(?format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // the first call may lose to another test's subscriber
        let _ = init_tracing("warn", LogFormat::Pretty);
        assert!(init_tracing("warn", LogFormat::Json).is_err());
    }
}
