//! Logging initialization for the client.
//!
//! All client components share a single `tracing` subscriber. Level filtering
//! follows `RUST_LOG` when set, otherwise the configured default.

use tracing_subscriber::EnvFilter;

/// Initialize the logging system for the client.
///
/// Safe to call more than once; only the first call installs the subscriber.
///
/// # Arguments
///
/// * `level` - Default log level (trace, debug, info, warn, error)
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
