//! Configuration for the event log store

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Default interval between garbage-collection sweeps
const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Default idle time after which a barrel is collected
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default age of the last flush after which buffered data is persisted
const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(120);

/// Retry behaviour for a failing persistence sink
///
/// The default performs a single attempt: a failed batch goes straight to the
/// garbage sink and the barrel's persistence time still advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub max_retries: u32,
    /// Base delay between attempts, doubled on each retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// No retries (the default)
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `max_retries` times starting at `backoff`
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `attempt` (0-based): backoff * 2^attempt, capped at 64x.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.pow(attempt.min(6)))
    }
}

/// Configuration for an [`EventLogStore`](crate::EventLogStore)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Interval between garbage-collection sweeps
    pub gc_interval: Duration,
    /// A barrel with no insert for this long is collected
    pub idle_timeout: Duration,
    /// A non-empty barrel not flushed for this long is persisted
    pub persistence_timeout: Duration,
    /// Buffered messages per barrel before an early flush is requested
    pub barrel_buffer_limit: usize,
    /// Capacity of each subscriber delivery queue
    pub subscriber_queue_capacity: usize,
    /// Capacity of the persistence command channel
    pub command_channel_capacity: usize,
    /// Maximum number of emptied barrels kept for reuse
    pub pool_capacity: usize,
    /// Retry behaviour for the persistence sink
    pub flush_retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gc_interval: DEFAULT_GC_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            persistence_timeout: DEFAULT_PERSISTENCE_TIMEOUT,
            barrel_buffer_limit: 1024,
            subscriber_queue_capacity: 256,
            command_channel_capacity: 256,
            pool_capacity: 128,
            flush_retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Set the garbage-collection interval
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the persistence timeout
    pub fn with_persistence_timeout(mut self, timeout: Duration) -> Self {
        self.persistence_timeout = timeout;
        self
    }

    /// Set the per-barrel buffer limit
    pub fn with_barrel_buffer_limit(mut self, limit: usize) -> Self {
        self.barrel_buffer_limit = limit;
        self
    }

    /// Set the subscriber delivery queue capacity
    pub fn with_subscriber_queue_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_queue_capacity = capacity;
        self
    }

    /// Set the persistence command channel capacity
    pub fn with_command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Set the barrel pool capacity
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Set the flush retry policy
    pub fn with_flush_retry(mut self, policy: RetryPolicy) -> Self {
        self.flush_retry = policy;
        self
    }

    /// Check the configuration for values the store cannot run with
    pub fn validate(&self) -> StoreResult<()> {
        if self.gc_interval.is_zero() {
            return Err(StoreError::config("gc_interval must be non-zero"));
        }
        if self.idle_timeout.is_zero() {
            return Err(StoreError::config("idle_timeout must be non-zero"));
        }
        let Some(min_persistence) = self.idle_timeout.checked_mul(2) else {
            return Err(StoreError::config(format!(
                "idle_timeout ({:?}) is out of range",
                self.idle_timeout
            )));
        };
        if self.persistence_timeout < min_persistence {
            return Err(StoreError::config(format!(
                "persistence_timeout ({:?}) must be at least twice idle_timeout ({:?})",
                self.persistence_timeout, self.idle_timeout
            )));
        }
        if self.barrel_buffer_limit == 0 {
            return Err(StoreError::config("barrel_buffer_limit must be non-zero"));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(StoreError::config(
                "subscriber_queue_capacity must be non-zero",
            ));
        }
        if self.command_channel_capacity == 0 {
            return Err(StoreError::config(
                "command_channel_capacity must be non-zero",
            ));
        }
        Ok(())
    }
}
