//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur while setting up logging
#[derive(Debug, Clone, Error)]
pub enum LoggingError {
    /// Failed to install the global subscriber
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Invalid configuration provided
    #[error("Invalid logging configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(err.to_string(), "Failed to initialize logging: already set");
    }
}
