// netpolicy-cli/src/logging.rs
// ============================================================================
// Module: Logging Setup
// Description: JSON tracing subscriber driven by `log_level` or `RUST_LOG`.
// Purpose: Give every process the same structured log format.
// Dependencies: tracing-subscriber
// ============================================================================

//! ## Overview
//! `RUST_LOG` wins over the configured level so operators can raise
//! verbosity for one module without editing the config file.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Logging setup failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level is not a valid filter directive.
    #[error("invalid log level '{0}': {1}")]
    InvalidLevel(String, String),
    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

/// Builds the filter for `level`, preferring `RUST_LOG` when it is set.
///
/// # Errors
///
/// Returns [`LoggingError::InvalidLevel`] when `level` cannot be parsed.
pub fn filter_for(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level.trim())
        .map_err(|err| LoggingError::InvalidLevel(level.to_string(), err.to_string()))
}

/// Installs the JSON subscriber on stderr.
///
/// # Errors
///
/// Returns [`LoggingError`] when the level is invalid or a subscriber is
/// already installed.
pub fn init(level: &str) -> Result<(), LoggingError> {
    let filter = filter_for(level)?;
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| LoggingError::Install(err.to_string()))
}
