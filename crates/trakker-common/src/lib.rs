//! # Trakker Common
//!
//! Shared error type, logging setup, JSON config loading and timeout helpers
//! for the Trakker workspace.
//!
//! ## Features
//!
//! - Unified error type for config, I/O and timeout failures
//! - Logging configuration and setup
//! - JSON configuration files with default fallbacks
//! - Timeout utilities for lifetime-bounded work

use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod logging;
pub mod timeout;

pub use config::load_json_config;
pub use logging::{init_logging, LogConfig, LogFormat};
pub use timeout::with_timeout;

/// Unified error type for Trakker.
#[derive(Error, Debug)]
pub enum TrakkerError {
    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl TrakkerError {
    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type alias for Trakker operations.
pub type Result<T> = std::result::Result<T, TrakkerError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| TrakkerError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_config_error_keeps_source() {
        let parse = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad json");
        let err = TrakkerError::config_with_source("invalid config trakker.json", parse);
        assert_eq!(err.to_string(), "Config error: invalid config trakker.json");
        assert_eq!(err.source().unwrap().to_string(), "bad json");
        assert!(TrakkerError::config("x").source().is_none());
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("trakkertime-cache-v2"),
            Err(TrakkerError::NotFound(name)) if name == "trakkertime-cache-v2"
        ));
    }
}
