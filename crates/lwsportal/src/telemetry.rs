//! Process-wide tracing setup.
//!
//! Library code logs through the `log` facade and opens `tracing` spans; the
//! embedding binary calls [`init_tracing`] once at startup to route both into
//! a single `tracing-subscriber` pipeline.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs the global subscriber.
///
/// Filtering follows `RUST_LOG` and defaults to `info`. `json` selects
/// structured output for log shipping; otherwise human-readable text is
/// written. Fails if a logger or subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<(), TelemetryError> {
    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let subscriber = tracing_subscriber::registry().with(output).with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_only_once() {
        assert!(init_tracing(false).is_ok());
        log::info!("telemetry initialized for tests");
        assert!(init_tracing(true).is_err());
    }
}
