//! Error types for logging setup

use thiserror::Error;

/// Errors that can occur while building or installing the subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// Log directory or file could not be created
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A level or target directive did not parse
    #[error("Invalid filter directive: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// The rolling file appender rejected its configuration
    #[error("File appender error: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    /// A global subscriber is already installed
    #[error("Subscriber already initialized: {0}")]
    Init(#[from] tracing::dispatcher::SetGlobalDefaultError),
}
