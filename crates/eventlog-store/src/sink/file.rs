//! File-backed persistence sink
//!
//! Appends each flushed batch to `<dir>/<event_id>.log` as JSON lines.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::PersistenceSink;
use crate::error::SinkError;
use crate::message::EventLogMessage;

/// Persistence sink writing one JSON-lines file per event stream
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    /// Whether to fsync after each batch
    sync_writes: bool,
}

impl FileSink {
    /// Create a sink rooted at `dir`, creating the directory if needed
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            sync_writes: true,
        })
    }

    /// Enable or disable fsync after each batch
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Path of the log file for an event stream
    ///
    /// ASCII letters, digits and `-` are kept; every other byte becomes `_`
    /// followed by its two hex digits, so distinct ids never share a file.
    pub fn path_for(&self, event_id: &str) -> PathBuf {
        let mut name = String::with_capacity(event_id.len() + 4);
        for byte in event_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                name.push(char::from(byte));
            } else {
                name.push('_');
                name.push_str(&hex::encode([byte]));
            }
        }
        name.push_str(".log");
        self.dir.join(name)
    }
}

#[async_trait]
impl PersistenceSink for FileSink {
    async fn save_messages(
        &self,
        event_id: &str,
        batch: &[EventLogMessage],
    ) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(batch.len() * 128);
        for message in batch {
            serde_json::to_writer(&mut buf, message)?;
            buf.push(b'\n');
        }

        let path = self.path_for(event_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&buf).await?;
        if self.sync_writes {
            file.sync_data().await?;
        }

        debug!(event_id, count = batch.len(), path = ?path, "Appended batch to log file");
        Ok(())
    }
}
