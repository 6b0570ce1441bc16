//! In-memory persistence sink
//!
//! Records every batch it is given. Suitable for tests and simulation; a
//! failure switch lets callers exercise the garbage path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::PersistenceSink;
use crate::error::SinkError;
use crate::message::EventLogMessage;

/// A batch as received by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct SavedBatch {
    /// Event stream the batch was flushed from
    pub event_id: String,
    /// Messages in flush order
    pub messages: Vec<EventLogMessage>,
}

/// In-memory implementation of [`PersistenceSink`]
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<SavedBatch>>,
    /// Number of save calls, including failed ones
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of save calls received
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batches stored successfully
    pub fn batches(&self) -> Vec<SavedBatch> {
        self.batches.lock().clone()
    }

    /// Batches stored for one event stream
    pub fn batches_for(&self, event_id: &str) -> Vec<SavedBatch> {
        self.batches
            .lock()
            .iter()
            .filter(|batch| batch.event_id == event_id)
            .cloned()
            .collect()
    }

    /// Total number of messages stored
    pub fn message_count(&self) -> usize {
        self.batches.lock().iter().map(|b| b.messages.len()).sum()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn save_messages(
        &self,
        event_id: &str,
        batch: &[EventLogMessage],
    ) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::unavailable("memory sink set to fail"));
        }

        trace!(event_id, count = batch.len(), "Saving batch in memory");
        self.batches.lock().push(SavedBatch {
            event_id: event_id.to_string(),
            messages: batch.to_vec(),
        });
        Ok(())
    }
}
