/*!
 * Logging and tracing initialization
 *
 * The engine itself never installs a subscriber. Applications either call
 * [`init_logging`] once, or build a [`Dispatch`] with [`build_dispatch`] and
 * hand it to a connection, which runs every operation under it.
 */

use std::fs::File;
use tracing::Dispatch;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{ConfigError, LoggingConfig};

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "orbit_bucket={}",
                config.level.to_tracing_level()
            ))
        })
        .map_err(|e| ConfigError::Logging(format!("Failed to create log filter: {}", e)))
}

/// Build the configured subscriber as a dispatcher without installing it
pub fn build_dispatch(config: &LoggingConfig) -> Result<Dispatch, ConfigError> {
    let filter = env_filter(config)?;

    if let Some(ref log_path) = config.log_file {
        let file = File::create(log_path)
            .map_err(|e| ConfigError::Logging(format!("Failed to create log file: {}", e)))?;
        let layer = fmt::layer()
            .with_writer(file)
            .with_thread_names(true)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE);
        return Ok(if config.json {
            Dispatch::new(tracing_subscriber::registry().with(filter).with(layer.json()))
        } else {
            Dispatch::new(tracing_subscriber::registry().with(filter).with(layer))
        });
    }

    let layer = fmt::layer().with_target(true).with_span_events(FmtSpan::NONE);
    Ok(if config.json {
        Dispatch::new(tracing_subscriber::registry().with(filter).with(layer.json()))
    } else {
        Dispatch::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.compact()),
        )
    })
}

/// Install the configured subscriber as the process-wide default
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigError> {
    build_dispatch(config)?
        .try_init()
        .map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Initialize logging for tests; safe to call repeatedly
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("orbit_bucket=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
