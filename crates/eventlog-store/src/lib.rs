//! # Eventlog Store
//!
//! In-memory buffering, live fan-out and persistence of container log lines,
//! grouped per event stream.
//!
//! Producers push [`EventLogMessage`]s into an [`EventLogStore`]. Each event id
//! gets its own [`Barrel`], taken from a [`BarrelPool`] on first reference. A
//! barrel buffers messages, copies them to subscriber delivery queues, and is
//! flushed to a [`PersistenceSink`] when its buffer fills, when its data has
//! waited too long, when it goes idle, or when the store stops.
//!
//! ## Features
//!
//! - **Two-level locking**: one read-write lock for the event-id mapping, one
//!   mutex per barrel; inserts into different streams never contend
//! - **Lossy live delivery**: bounded per-subscriber queues, drop-newest on overflow
//! - **Idle reclamation**: a periodic sweep persists and pools idle barrels
//! - **Failure isolation**: batches the sink rejects go to a [`GarbageSink`]
//! - **Prometheus gauges** via [`StoreMetrics`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use eventlog_store::{EventLogMessage, EventLogStore, MemorySink, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sink = Arc::new(MemorySink::new());
//!     let store = EventLogStore::new(StoreConfig::default(), sink).unwrap();
//!     store.run().unwrap();
//!
//!     let queue = store.subscribe("e2", "web-console").unwrap();
//!     store.insert_message(EventLogMessage::new("e2", "pulling image"));
//!     assert_eq!(queue.recv_async().await.unwrap().text(), "pulling image");
//!
//!     // Persists everything still buffered
//!     store.stop().await;
//! }
//! ```

pub mod barrel;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod sink;
pub mod store;

// Re-exports
pub use barrel::{Barrel, DeliveryQueue, FlushOutcome};
pub use config::{RetryPolicy, StoreConfig};
pub use error::{SinkError, StoreError, StoreResult};
pub use message::{EventLogMessage, LogLevel};
pub use metrics::StoreMetrics;
pub use pool::BarrelPool;
pub use sink::{
    DiscardGarbage, FileSink, GarbageSink, MemoryGarbage, MemorySink, PersistenceSink, SavedBatch,
};
pub use store::{BarrelCommand, EventLogStore, GcReport, MonitorData};
