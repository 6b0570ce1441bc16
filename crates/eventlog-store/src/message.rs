//! Log message type carried through the store

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// One log line tagged with the event stream it belongs to
///
/// Messages are immutable once created. The payload is a [`Bytes`] buffer so
/// fanning a message out to many subscribers does not copy it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogMessage {
    /// Event stream this line belongs to
    pub event_id: String,
    /// Producer-assigned sequence number
    pub sequence: u64,
    /// Build or deploy step that produced the line
    pub step: Option<String>,
    /// Severity
    pub level: LogLevel,
    /// Time the line was produced
    pub time: DateTime<Utc>,
    /// Raw payload
    pub message: Bytes,
}

impl EventLogMessage {
    /// Create an info-level message for `event_id` stamped with the current time
    pub fn new(event_id: impl Into<String>, message: impl Into<Bytes>) -> Self {
        Self {
            event_id: event_id.into(),
            sequence: 0,
            step: None,
            level: LogLevel::Info,
            time: Utc::now(),
            message: message.into(),
        }
    }

    /// Set the step
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Set the level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}
