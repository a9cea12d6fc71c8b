//! Logging infrastructure for playcore
//!
//! Installs a `tracing` subscriber whose filter can be replaced at runtime.
//! The `msg-level` option is applied through `apply_msg_level` whenever an
//! option write carries `UpdateFlags::TERM`.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy)]
pub enum LoggingMode {
    /// No output
    Silent,
    /// Compact stderr output for development
    Development,
    /// Verbose diagnostics with source locations
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to reload log filter: {0}")]
    Reload(String),
}

/// Initialize logging with the specified mode
///
/// # Examples
///
/// ```rust,ignore
/// playcore::logging::init_logging(LoggingMode::Development)?;
/// ```
///
/// # Environment Variables
///
/// - `PLAYCORE_LOG_LEVEL`: Override log filter (e.g. `debug`, `playcore::hook=trace`)
/// - `RUST_LOG`: Used when `PLAYCORE_LOG_LEVEL` is not set
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let default_level = match mode {
        LoggingMode::Silent => return Ok(()),
        LoggingMode::Development => "info",
        LoggingMode::Debug => "debug",
    };

    let (filter, handle) = reload::Layer::new(create_env_filter(default_level));

    match mode {
        LoggingMode::Development => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        _ => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    }
    .map_err(|e| LoggingError::TracingInit(e.to_string()))?;

    let _ = FILTER_HANDLE.set(handle);
    Ok(())
}

/// Initialize logging from the `PLAYCORE_LOG_MODE` environment variable
///
/// - "development" -> LoggingMode::Development
/// - "debug" -> LoggingMode::Debug
///
/// Defaults to Silent mode if not specified or invalid.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("PLAYCORE_LOG_MODE").as_deref() {
        Ok("development") => LoggingMode::Development,
        Ok("debug") => LoggingMode::Debug,
        _ => LoggingMode::Silent,
    };

    init_logging(mode)
}

/// Create an environment filter with fallback to default level
fn create_env_filter(default_level: &str) -> EnvFilter {
    // First try PLAYCORE_LOG_LEVEL, then RUST_LOG, then default
    if let Ok(level) = std::env::var("PLAYCORE_LOG_LEVEL") {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}

/// Replace the active filter with the directives of the `msg-level` option
///
/// An empty value keeps the current filter. Does nothing when logging was
/// not initialized through this module.
pub fn apply_msg_level(directives: &str) -> Result<(), LoggingError> {
    if directives.trim().is_empty() {
        return Ok(());
    }
    let filter =
        EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;
    match FILTER_HANDLE.get() {
        Some(handle) => handle
            .reload(filter)
            .map_err(|e| LoggingError::Reload(e.to_string())),
        None => Ok(()),
    }
}

/// Check if logging has been initialized
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

/// Convenience function to initialize with silent mode
pub fn init_silent() -> Result<(), LoggingError> {
    init_logging(LoggingMode::Silent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[test]
    fn test_empty_msg_level_is_noop() {
        assert!(apply_msg_level("").is_ok());
    }

    #[test]
    fn test_invalid_msg_level_is_rejected() {
        assert!(matches!(
            apply_msg_level("playcore=notalevel"),
            Err(LoggingError::InvalidFilter(_))
        ));
    }
}
