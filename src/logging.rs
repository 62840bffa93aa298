//! Structured logging, initialized once at process start and threaded
//! through every public operation as `tracing` spans (`repo`, `branch`,
//! `operation`).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CoreError, Result};

fn env_filter() -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("repocache=info"))
        .map_err(|e| CoreError::Config(crate::config::ConfigError::Invalid {
            key: "RUST_LOG",
            value: e.to_string(),
            reason: "failed to build a tracing filter".to_string(),
        }))
}

/// Compact, human-readable logging to stdout. The default for interactive
/// use (the CLI).
pub fn init_stdout_logging() -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| CoreError::Config(crate::config::ConfigError::Invalid {
            key: "RUST_LOG",
            value: e.to_string(),
            reason: "a global subscriber is already installed".to_string(),
        }))
}

/// JSON logging for production/service contexts, where logs are shipped to
/// an aggregator rather than read by a human at a terminal.
pub fn init_json_logging() -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .json();

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| CoreError::Config(crate::config::ConfigError::Invalid {
            key: "RUST_LOG",
            value: e.to_string(),
            reason: "a global subscriber is already installed".to_string(),
        }))
}

#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repocache=debug"));
        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
