//! Per-event-stream message buffer
//!
//! A [`Barrel`] owns the buffered messages of exactly one event stream, the
//! delivery queues of its live subscribers, and the staging area used while a
//! flush is in progress.
//!
//! Two locks guard a barrel:
//! - `state` (a short-held mutex) covers the buffer, subscribers and
//!   timestamps. Inserts only ever take this lock.
//! - `staged` (an async mutex) serializes flushes. It is held across the sink
//!   call, so a slow sink stalls further flushes of this barrel but never an
//!   insert.

use std::collections::HashMap;

use flume::TrySendError;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::RetryPolicy;
use crate::error::SinkError;
use crate::message::EventLogMessage;
use crate::sink::{GarbageSink, PersistenceSink};

/// Receiving end of a subscriber's delivery queue
///
/// Queues are bounded. When a queue is full, new messages for that subscriber
/// are dropped (drop-newest); delivery to subscribers is lossy, persistence is
/// not. The queue disconnects once the barrel is collected. Dropping the queue
/// ends the subscription at the next insert.
pub type DeliveryQueue = flume::Receiver<EventLogMessage>;

/// Result of a [`Barrel::flush`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered; the sink was not called
    Empty,
    /// The batch of this many messages was stored by the sink
    Persisted(usize),
    /// The sink failed and this many messages went to the garbage sink
    Discarded(usize),
}

impl FlushOutcome {
    /// Whether the sink was invoked
    pub fn sink_called(&self) -> bool {
        !matches!(self, FlushOutcome::Empty)
    }
}

struct Subscriber {
    tx: flume::Sender<EventLogMessage>,
    /// Kept so repeated subscriptions hand out the same queue. It also keeps
    /// the channel connected, so abandonment is detected by receiver count.
    rx: DeliveryQueue,
    dropped: u64,
}

struct BarrelState {
    buffer: Vec<EventLogMessage>,
    subscribers: HashMap<String, Subscriber>,
    update_time: Instant,
    persistence_time: Instant,
    needs_persistence: bool,
}

/// Buffered state of one event stream
pub struct Barrel {
    name: String,
    state: Mutex<BarrelState>,
    staged: tokio::sync::Mutex<Vec<EventLogMessage>>,
    buffer_limit: usize,
    queue_capacity: usize,
}

impl std::fmt::Debug for Barrel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Barrel")
            .field("name", &self.name)
            .field("buffered", &state.buffer.len())
            .field("subscribers", &state.subscribers.len())
            .field("needs_persistence", &state.needs_persistence)
            .finish()
    }
}

impl Barrel {
    /// Create an unassigned barrel
    pub(crate) fn new(buffer_limit: usize, queue_capacity: usize) -> Self {
        let now = Instant::now();
        Self {
            name: String::new(),
            state: Mutex::new(BarrelState {
                buffer: Vec::new(),
                subscribers: HashMap::new(),
                update_time: now,
                persistence_time: now,
                needs_persistence: false,
            }),
            staged: tokio::sync::Mutex::new(Vec::new()),
            buffer_limit,
            queue_capacity,
        }
    }

    /// Bind the barrel to an event stream and restart its clocks
    pub(crate) fn assign(&mut self, event_id: &str) {
        self.name.clear();
        self.name.push_str(event_id);
        let now = Instant::now();
        let state = self.state.get_mut();
        state.update_time = now;
        state.persistence_time = now;
    }

    /// Event id this barrel serves
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message and fan it out to subscribers
    ///
    /// Returns `true` when this insert filled the buffer to its limit and an
    /// early flush should be requested. Only the crossing insert reports it.
    pub fn insert(&self, message: EventLogMessage) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.update_time = Instant::now();

        let name = &self.name;
        state.subscribers.retain(|id, subscriber| {
            // Only the barrel's own handle is left: the consumer dropped its queue
            if subscriber.tx.receiver_count() <= 1 {
                debug!(event_id = %name, subscriber = %id, "Pruning abandoned subscriber");
                return false;
            }
            match subscriber.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    subscriber.dropped += 1;
                    trace!(event_id = %name, subscriber = %id, "Delivery queue full, dropping message");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });

        state.buffer.push(message);
        if !state.needs_persistence && state.buffer.len() >= self.buffer_limit {
            state.needs_persistence = true;
            return true;
        }
        false
    }

    /// Register a subscriber, or return its existing queue
    pub fn add_subscriber(&self, subscriber_id: &str) -> DeliveryQueue {
        let mut state = self.state.lock();
        if let Some(existing) = state.subscribers.get(subscriber_id) {
            return existing.rx.clone();
        }

        let (tx, rx) = flume::bounded(self.queue_capacity);
        state.subscribers.insert(
            subscriber_id.to_string(),
            Subscriber {
                tx,
                rx: rx.clone(),
                dropped: 0,
            },
        );
        debug!(event_id = %self.name, subscriber = subscriber_id, "Subscriber added");
        rx
    }

    /// Deregister a subscriber; returns whether it was registered
    pub fn remove_subscriber(&self, subscriber_id: &str) -> bool {
        let removed = self.state.lock().subscribers.remove(subscriber_id).is_some();
        if removed {
            debug!(event_id = %self.name, subscriber = subscriber_id, "Subscriber removed");
        }
        removed
    }

    /// Number of registered subscribers
    ///
    /// Subscribers whose queue was dropped without unsubscribing are counted
    /// until the next insert prunes them.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Messages dropped for a subscriber because its queue was full
    pub fn dropped_for(&self, subscriber_id: &str) -> Option<u64> {
        self.state
            .lock()
            .subscribers
            .get(subscriber_id)
            .map(|s| s.dropped)
    }

    /// Number of messages waiting to be flushed
    pub fn buffered_len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Copy of the buffered messages
    pub fn buffered(&self) -> Vec<EventLogMessage> {
        self.state.lock().buffer.clone()
    }

    /// Whether an early flush has been requested and not yet served
    pub fn needs_persistence(&self) -> bool {
        self.state.lock().needs_persistence
    }

    /// Time of the last insert (or of assignment, if none)
    pub fn update_time(&self) -> Instant {
        self.state.lock().update_time
    }

    /// Time of the last flush attempt (or of assignment, if none)
    pub fn persistence_time(&self) -> Instant {
        self.state.lock().persistence_time
    }

    /// No insert for at least `idle_timeout` as of `now`
    pub fn is_idle(&self, now: Instant, idle_timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.state.lock().update_time) >= idle_timeout
    }

    /// Data buffered and not flushed for at least `persistence_timeout` as of `now`
    pub fn is_persistence_due(&self, now: Instant, persistence_timeout: std::time::Duration) -> bool {
        let state = self.state.lock();
        !state.buffer.is_empty()
            && now.saturating_duration_since(state.persistence_time) >= persistence_timeout
    }

    /// Move buffered messages to the sink
    ///
    /// The buffer is drained into the staging area under the flush lock, so
    /// inserts arriving during the sink call land in a fresh buffer. A failed
    /// batch is handed to `garbage` and is not re-queued; the persistence time
    /// advances either way.
    pub async fn flush(
        &self,
        sink: &dyn PersistenceSink,
        garbage: &dyn GarbageSink,
        retry: RetryPolicy,
    ) -> FlushOutcome {
        let mut staged = self.staged.lock().await;
        {
            let mut state = self.state.lock();
            staged.append(&mut state.buffer);
            state.needs_persistence = false;
        }

        if staged.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = staged.len();
        let outcome = match self.save_with_retry(sink, &staged, retry).await {
            Ok(()) => {
                info!(event_id = %self.name, count, "Persisted barrel log messages");
                staged.clear();
                FlushOutcome::Persisted(count)
            }
            Err(e) => {
                warn!(event_id = %self.name, count, error = %e, "Failed to persist barrel log messages");
                garbage.insert_garbage(&self.name, std::mem::take(&mut *staged));
                FlushOutcome::Discarded(count)
            }
        };

        self.state.lock().persistence_time = Instant::now();
        outcome
    }

    async fn save_with_retry(
        &self,
        sink: &dyn PersistenceSink,
        batch: &[EventLogMessage],
        retry: RetryPolicy,
    ) -> Result<(), SinkError> {
        let mut attempt = 0;
        loop {
            match sink.save_messages(&self.name, batch).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retry.max_retries => {
                    let delay = retry.delay_for(attempt);
                    debug!(event_id = %self.name, attempt, ?delay, error = %e, "Retrying barrel flush");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop all buffered data and subscriptions
    ///
    /// Only called once the barrel has left the store's mapping; dropping the
    /// subscriber senders disconnects their delivery queues.
    pub(crate) fn empty(&mut self) {
        let state = self.state.get_mut();
        state.buffer.clear();
        state.subscribers.clear();
        state.needs_persistence = false;
        self.staged.get_mut().clear();
        self.name.clear();
    }

    /// No residual stream state
    pub(crate) fn is_clean(&mut self) -> bool {
        let state = self.state.get_mut();
        state.buffer.is_empty()
            && state.subscribers.is_empty()
            && !state.needs_persistence
            && self.staged.get_mut().is_empty()
            && self.name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemoryGarbage, MemorySink};

    fn barrel(name: &str) -> Barrel {
        let mut barrel = Barrel::new(4, 2);
        barrel.assign(name);
        barrel
    }

    #[test]
    fn test_insert_buffers_in_order() {
        let barrel = barrel("e1");
        barrel.insert(EventLogMessage::new("e1", "a"));
        barrel.insert(EventLogMessage::new("e1", "b"));

        let texts: Vec<_> = barrel.buffered().iter().map(|m| m.text().into_owned()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_insert_reports_buffer_limit_once() {
        let barrel = barrel("e1");
        let crossings: Vec<bool> = (0..6)
            .map(|i| barrel.insert(EventLogMessage::new("e1", format!("m{i}"))))
            .collect();

        assert_eq!(crossings, vec![false, false, false, true, false, false]);
        assert!(barrel.needs_persistence());
    }

    #[test]
    fn test_add_subscriber_is_idempotent() {
        let barrel = barrel("e1");
        let first = barrel.add_subscriber("sub");
        let second = barrel.add_subscriber("sub");

        assert!(first.same_channel(&second));
        assert_eq!(barrel.subscriber_count(), 1);
    }

    #[test]
    fn test_full_queue_drops_newest_without_affecting_others() {
        let barrel = barrel("e1");
        let slow = barrel.add_subscriber("slow");
        let fast = barrel.add_subscriber("fast");

        for i in 0..3 {
            barrel.insert(EventLogMessage::new("e1", format!("m{i}")));
            let received = fast.try_recv().unwrap();
            assert_eq!(received.text(), format!("m{i}"));
        }

        // Capacity 2: the third message was dropped for the slow subscriber only
        assert_eq!(slow.try_recv().unwrap().text(), "m0");
        assert_eq!(slow.try_recv().unwrap().text(), "m1");
        assert!(slow.try_recv().is_err());
        assert_eq!(barrel.dropped_for("slow"), Some(1));
        assert_eq!(barrel.dropped_for("fast"), Some(0));
        assert_eq!(barrel.buffered_len(), 3);
    }

    #[test]
    fn test_dropped_queue_is_pruned_on_insert() {
        let barrel = barrel("e1");
        let kept = barrel.add_subscriber("kept");
        for i in 0..100 {
            drop(barrel.add_subscriber(&format!("gone-{i}")));
        }
        assert_eq!(barrel.subscriber_count(), 101);

        barrel.insert(EventLogMessage::new("e1", "a"));

        assert_eq!(barrel.subscriber_count(), 1);
        assert_eq!(barrel.dropped_for("gone-0"), None);
        assert_eq!(kept.try_recv().unwrap().text(), "a");

        // A later subscription under a pruned id starts a fresh queue
        let again = barrel.add_subscriber("gone-0");
        barrel.insert(EventLogMessage::new("e1", "b"));
        assert_eq!(again.try_recv().unwrap().text(), "b");
        assert_eq!(barrel.subscriber_count(), 2);
    }

    #[test]
    fn test_remove_subscriber() {
        let barrel = barrel("e1");
        barrel.add_subscriber("sub");
        assert!(barrel.remove_subscriber("sub"));
        assert!(!barrel.remove_subscriber("sub"));
        assert_eq!(barrel.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_moves_buffer_to_sink() {
        let barrel = barrel("e1");
        let sink = MemorySink::new();
        let garbage = MemoryGarbage::new();
        barrel.insert(EventLogMessage::new("e1", "a"));
        barrel.insert(EventLogMessage::new("e1", "b"));

        let outcome = barrel.flush(&sink, &garbage, RetryPolicy::none()).await;

        assert_eq!(outcome, FlushOutcome::Persisted(2));
        assert_eq!(barrel.buffered_len(), 0);
        assert!(!barrel.needs_persistence());
        assert_eq!(sink.batches_for("e1")[0].messages.len(), 2);
        assert_eq!(garbage.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_flush_empty_barrel_skips_sink() {
        let barrel = barrel("e1");
        let sink = MemorySink::new();

        let outcome = barrel.flush(&sink, &MemoryGarbage::new(), RetryPolicy::none()).await;

        assert_eq!(outcome, FlushOutcome::Empty);
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_goes_to_garbage_and_advances_clock() {
        let barrel = barrel("e1");
        let sink = MemorySink::new();
        let garbage = MemoryGarbage::new();
        sink.set_failing(true);
        barrel.insert(EventLogMessage::new("e1", "lost"));
        let before = barrel.persistence_time();

        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        let outcome = barrel.flush(&sink, &garbage, RetryPolicy::none()).await;

        assert_eq!(outcome, FlushOutcome::Discarded(1));
        assert_eq!(sink.call_count(), 1);
        assert_eq!(garbage.messages()[0].text(), "lost");
        assert_eq!(barrel.buffered_len(), 0);
        assert!(barrel.persistence_time() > before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_retries_with_policy() {
        let barrel = barrel("e1");
        let sink = MemorySink::new();
        let garbage = MemoryGarbage::new();
        sink.set_failing(true);
        barrel.insert(EventLogMessage::new("e1", "x"));

        let policy = RetryPolicy::new(2, std::time::Duration::from_millis(10));
        let outcome = barrel.flush(&sink, &garbage, policy).await;

        assert_eq!(outcome, FlushOutcome::Discarded(1));
        assert_eq!(sink.call_count(), 3);
        assert_eq!(garbage.batch_count(), 1);
    }

    #[test]
    fn test_empty_clears_everything() {
        let mut barrel = barrel("e1");
        let queue = barrel.add_subscriber("sub");
        for i in 0..5 {
            barrel.insert(EventLogMessage::new("e1", format!("m{i}")));
        }
        assert!(!barrel.is_clean());

        barrel.empty();

        assert!(barrel.is_clean());
        assert_eq!(barrel.name(), "");
        // Queue keeps already-delivered items, then reports disconnection
        while queue.try_recv().is_ok() {}
        assert!(queue.is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_and_persistence_due() {
        let barrel = barrel("e1");
        let idle = std::time::Duration::from_secs(60);
        let persist = std::time::Duration::from_secs(120);

        assert!(!barrel.is_idle(Instant::now(), idle));

        tokio::time::advance(idle).await;
        assert!(barrel.is_idle(Instant::now(), idle));
        // Nothing buffered, so never persistence-due
        tokio::time::advance(persist).await;
        assert!(!barrel.is_persistence_due(Instant::now(), persist));

        barrel.insert(EventLogMessage::new("e1", "x"));
        assert!(!barrel.is_idle(Instant::now(), idle));
        assert!(barrel.is_persistence_due(Instant::now(), persist));
    }
}
