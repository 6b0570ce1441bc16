//! Error types for eventlog-store
//!
//! Ingestion is fire-and-forget and never surfaces errors; these types cover
//! the lifecycle, configuration and persistence sink boundaries.

use thiserror::Error;

/// Errors returned by a persistence sink
#[derive(Debug, Error)]
pub enum SinkError {
    /// I/O error while writing a batch
    #[error("I/O error: {0}")]
    Io(String),

    /// A message could not be encoded for the sink
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The sink refused or could not accept the batch
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

impl SinkError {
    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

/// Errors that can occur in store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// `run` was called on a store whose background tasks are already running
    #[error("Store already started")]
    AlreadyStarted,

    /// A subscription was requested without an event id
    #[error("Event id must not be empty")]
    EmptyEventId,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence sink error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Metric descriptor rejected by prometheus
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl StoreError {
    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
