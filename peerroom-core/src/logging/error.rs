//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur while setting up logging
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    /// A global subscriber is already installed, or the filter was rejected
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// Level name not recognised
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
}
