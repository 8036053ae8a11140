//! Structured Logging for the Transparency Service
//!
//! Wraps `tracing-subscriber` initialisation:
//! - human-readable output for development
//! - JSON output for log aggregation services
//! - `RUST_LOG`-style filtering via the configured level

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging initialisation errors
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Application log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// `json` selects machine-readable output. Idempotent failures (a subscriber
/// already installed, e.g. in tests) are reported as `LoggingError::Init`.
pub fn init_logging(level: LogLevel, json: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scittlog={}", level_str(level))));

    let result = if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| LoggingError::Init(e.to_string()))
}

fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("WARNING"), LogLevel::Warn);
        assert_eq!(LogLevel::from("bogus"), LogLevel::Info);
    }

    #[test]
    fn test_level_conversion() {
        let level: Level = LogLevel::Error.into();
        assert_eq!(level, Level::ERROR);
    }
}
