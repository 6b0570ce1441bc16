//! Persistence and garbage sinks
//!
//! A [`PersistenceSink`] is the durable target barrels flush into. Batches the
//! sink rejects are handed to a [`GarbageSink`], which is best-effort and never
//! retried.

mod file;
mod memory;

pub use file::FileSink;
pub use memory::{MemorySink, SavedBatch};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::SinkError;
use crate::message::EventLogMessage;

/// Durable storage target for flushed barrels
///
/// Implementations may be slow; the store never calls them while holding its
/// event-id mapping lock.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Persist a batch of messages belonging to `event_id`
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be stored. The store logs the
    /// failure and routes the batch to its garbage sink.
    async fn save_messages(&self, event_id: &str, batch: &[EventLogMessage])
    -> Result<(), SinkError>;
}

/// Destination for batches the persistence sink failed to store
pub trait GarbageSink: Send + Sync {
    /// Accept a batch that could not be persisted
    fn insert_garbage(&self, event_id: &str, batch: Vec<EventLogMessage>);
}

/// Garbage sink that drops batches after logging them
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardGarbage;

impl GarbageSink for DiscardGarbage {
    fn insert_garbage(&self, event_id: &str, batch: Vec<EventLogMessage>) {
        warn!(event_id, dropped = batch.len(), "Discarding unpersisted log messages");
    }
}

/// Garbage sink that keeps rejected batches in memory
#[derive(Debug, Default)]
pub struct MemoryGarbage {
    batches: Mutex<Vec<(String, Vec<EventLogMessage>)>>,
}

impl MemoryGarbage {
    /// Create an empty garbage sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches received
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// All messages received, in arrival order
    pub fn messages(&self) -> Vec<EventLogMessage> {
        self.batches
            .lock()
            .iter()
            .flat_map(|(_, batch)| batch.iter().cloned())
            .collect()
    }
}

impl GarbageSink for MemoryGarbage {
    fn insert_garbage(&self, event_id: &str, batch: Vec<EventLogMessage>) {
        self.batches.lock().push((event_id.to_string(), batch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Both sink traits must stay object-safe; the store holds them as trait objects
    fn _assert_object_safe(_: &dyn PersistenceSink, _: &dyn GarbageSink) {}

    #[test]
    fn test_memory_garbage_collects_batches() {
        let garbage = MemoryGarbage::new();
        garbage.insert_garbage("e1", vec![EventLogMessage::new("e1", "a")]);
        garbage.insert_garbage(
            "e2",
            vec![EventLogMessage::new("e2", "b"), EventLogMessage::new("e2", "c")],
        );

        assert_eq!(garbage.batch_count(), 2);
        let texts: Vec<_> = garbage.messages().iter().map(|m| m.text().into_owned()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_discard_garbage_accepts_anything() {
        DiscardGarbage.insert_garbage("e1", Vec::new());
        DiscardGarbage.insert_garbage("e1", vec![EventLogMessage::new("e1", "x")]);
    }
}
