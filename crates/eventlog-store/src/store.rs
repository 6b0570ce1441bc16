//! Event log store coordinator
//!
//! [`EventLogStore`] maps event ids to [`Barrel`]s, routes inserts and
//! subscriptions to them, and runs two background tasks:
//!
//! - the garbage-collection sweep, which persists and reclaims idle barrels
//!   and persists barrels whose data has sat unflushed for too long;
//! - the persistence-command sweep, which flushes barrels that filled their
//!   buffer between sweeps.
//!
//! ```text
//! producer ──► insert_message ──► Barrel::insert ──► subscriber queues
//!                                     │
//!                 buffer full ────────┤──► BarrelCommand::Persist ──► flush
//!                                     │
//!                 gc sweep ───────────┴──► flush ──► PersistenceSink
//!                                                     └─(failure)─► GarbageSink
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::barrel::{Barrel, DeliveryQueue, FlushOutcome};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::message::EventLogMessage;
use crate::metrics::StoreMetrics;
use crate::pool::BarrelPool;
use crate::sink::{DiscardGarbage, GarbageSink, PersistenceSink};

/// Commands sent from the ingest path to the persistence-command task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrelCommand {
    /// Flush the named barrel if it still needs persistence
    Persist(String),
}

/// Point-in-time figures for external monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorData {
    /// Number of live barrels
    pub stream_count: usize,
    /// Messages received during the last GC interval
    pub messages_per_interval: u64,
}

/// Summary of one garbage-collection sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcReport {
    /// Barrels removed from the mapping
    pub collected: usize,
    /// Barrels that were persistence-due but kept
    pub persisted: usize,
    /// Flushes that reached the sink (including failed ones)
    pub flushes: usize,
    /// Barrels returned to the pool
    pub pooled: usize,
}

#[derive(Debug, Default)]
struct LogCounters {
    /// Messages since the last GC rotation
    total_log_count: AtomicU64,
    /// Messages in the last completed interval
    logs_per_interval: AtomicU64,
    /// Messages since the store was created
    all_log_count: AtomicU64,
}

impl LogCounters {
    fn record(&self) {
        self.total_log_count.fetch_add(1, Ordering::Relaxed);
        self.all_log_count.fetch_add(1, Ordering::Relaxed);
    }

    fn rotate(&self) {
        let current = self.total_log_count.swap(0, Ordering::Relaxed);
        self.logs_per_interval.store(current, Ordering::Relaxed);
    }
}

/// State shared between the store handle and its background tasks
pub(crate) struct StoreShared {
    config: StoreConfig,
    barrels: RwLock<HashMap<String, Arc<Barrel>>>,
    pool: BarrelPool,
    sink: Arc<dyn PersistenceSink>,
    garbage: Arc<dyn GarbageSink>,
    counters: LogCounters,
    command_tx: mpsc::Sender<BarrelCommand>,
}

impl StoreShared {
    pub(crate) fn barrel_count(&self) -> usize {
        self.barrels.read().len()
    }

    pub(crate) fn all_log_count(&self) -> u64 {
        self.counters.all_log_count.load(Ordering::Relaxed)
    }

    async fn flush_barrel(&self, barrel: &Barrel) -> FlushOutcome {
        barrel
            .flush(&*self.sink, &*self.garbage, self.config.flush_retry)
            .await
    }

    /// Serve a persistence command
    async fn persist(&self, event_id: &str) -> FlushOutcome {
        let barrel = self.barrels.read().get(event_id).cloned();
        match barrel {
            Some(barrel) if barrel.needs_persistence() => self.flush_barrel(&barrel).await,
            _ => FlushOutcome::Empty,
        }
    }

    async fn collect_garbage(&self) -> GcReport {
        let started = Instant::now();
        self.counters.rotate();

        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let persistence_timeout = self.config.persistence_timeout;

        let (idle, due) = {
            let barrels = self.barrels.read();
            let mut idle = Vec::new();
            let mut due = Vec::new();
            for (event_id, barrel) in barrels.iter() {
                if barrel.is_idle(now, idle_timeout) {
                    idle.push((event_id.clone(), Arc::clone(barrel)));
                } else if barrel.is_persistence_due(now, persistence_timeout) {
                    due.push(Arc::clone(barrel));
                }
            }
            (idle, due)
        };

        let mut report = GcReport::default();

        // Sink calls happen without the mapping lock held
        for (_, barrel) in &idle {
            if self.flush_barrel(barrel).await.sink_called() {
                report.flushes += 1;
            }
        }
        for barrel in &due {
            if self.flush_barrel(barrel).await.sink_called() {
                report.flushes += 1;
                report.persisted += 1;
            }
        }
        drop(due);
        let candidates: Vec<String> = idle.into_iter().map(|(event_id, _)| event_id).collect();

        if !candidates.is_empty() {
            let mut barrels = self.barrels.write();
            for event_id in candidates {
                // An insert after the scan revives the barrel
                let still_idle = barrels
                    .get(&event_id)
                    .is_some_and(|b| b.is_idle(now, idle_timeout) && b.buffered_len() == 0);
                if !still_idle {
                    continue;
                }
                let Some(barrel) = barrels.remove(&event_id) else {
                    continue;
                };
                report.collected += 1;

                match Arc::try_unwrap(barrel) {
                    Ok(mut barrel) => {
                        barrel.empty();
                        if self.pool.release(barrel) {
                            report.pooled += 1;
                        }
                    }
                    Err(_) => {
                        debug!(event_id = %event_id, "Barrel still referenced, not pooling");
                    }
                }
                debug!(event_id = %event_id, "Collected idle barrel");
            }
        }

        debug!(
            collected = report.collected,
            persisted = report.persisted,
            flushes = report.flushes,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Event log store gc complete"
        );
        report
    }

    /// Flush every live barrel; returns how many reached the sink
    async fn flush_all(&self) -> usize {
        let barrels: Vec<Arc<Barrel>> = self.barrels.read().values().cloned().collect();
        let mut flushed = 0;
        for barrel in barrels {
            if self.flush_barrel(&barrel).await.sink_called() {
                flushed += 1;
            }
        }
        flushed
    }
}

/// In-memory event log store
///
/// Construct one per process at startup and pass it (or an `Arc` of it) to
/// producers and subscribers. Call [`run`](Self::run) to start the background
/// sweeps and [`stop`](Self::stop) before exit to persist everything still
/// buffered.
pub struct EventLogStore {
    shared: Arc<StoreShared>,
    /// Held by the persistence-command task while it runs
    command_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<BarrelCommand>>>,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl EventLogStore {
    /// Create a store persisting to `sink`; failed batches are discarded
    pub fn new(config: StoreConfig, sink: Arc<dyn PersistenceSink>) -> StoreResult<Self> {
        Self::with_garbage_sink(config, sink, Arc::new(DiscardGarbage))
    }

    /// Create a store with an explicit garbage sink for failed batches
    pub fn with_garbage_sink(
        config: StoreConfig,
        sink: Arc<dyn PersistenceSink>,
        garbage: Arc<dyn GarbageSink>,
    ) -> StoreResult<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity);
        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = BarrelPool::new(
            config.pool_capacity,
            config.barrel_buffer_limit,
            config.subscriber_queue_capacity,
        );

        Ok(Self {
            shared: Arc::new(StoreShared {
                config,
                barrels: RwLock::new(HashMap::new()),
                pool,
                sink,
                garbage,
                counters: LogCounters::default(),
                command_tx,
            }),
            command_rx: Arc::new(tokio::sync::Mutex::new(command_rx)),
            shutdown_tx,
            background_tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Get the barrel pool
    pub fn pool(&self) -> &BarrelPool {
        &self.shared.pool
    }

    /// Ingest one log line
    ///
    /// Messages with an empty event id are ignored. The common case (barrel
    /// already live) only takes the mapping's shared lock.
    pub fn insert_message(&self, message: EventLogMessage) {
        if message.event_id.is_empty() {
            return;
        }
        self.shared.counters.record();

        {
            let barrels = self.shared.barrels.read();
            if let Some(barrel) = barrels.get(&message.event_id) {
                if barrel.insert(message) {
                    let event_id = barrel.name().to_string();
                    drop(barrels);
                    self.request_persist(event_id);
                }
                return;
            }
        }

        let mut barrels = self.shared.barrels.write();
        // Another producer may have created it between the two locks
        let barrel = barrels
            .entry(message.event_id.clone())
            .or_insert_with_key(|event_id| {
                debug!(event_id = %event_id, "Creating barrel");
                Arc::new(self.shared.pool.acquire(event_id))
            });
        if barrel.insert(message) {
            let event_id = barrel.name().to_string();
            drop(barrels);
            self.request_persist(event_id);
        }
    }

    fn request_persist(&self, event_id: String) {
        if let Err(e) = self
            .shared
            .command_tx
            .try_send(BarrelCommand::Persist(event_id))
        {
            debug!(error = %e, "Persistence command dropped");
        }
    }

    /// Subscribe to live messages of an event stream
    ///
    /// Creates the barrel if the stream has not been seen yet. Subscribing
    /// twice with the same ids returns the same queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmptyEventId`] if `event_id` is empty.
    pub fn subscribe(&self, event_id: &str, subscriber_id: &str) -> StoreResult<DeliveryQueue> {
        if event_id.is_empty() {
            return Err(StoreError::EmptyEventId);
        }

        if let Some(barrel) = self.shared.barrels.read().get(event_id) {
            return Ok(barrel.add_subscriber(subscriber_id));
        }

        let mut barrels = self.shared.barrels.write();
        let barrel = barrels.entry(event_id.to_string()).or_insert_with(|| {
            debug!(event_id, "Creating barrel for subscriber");
            Arc::new(self.shared.pool.acquire(event_id))
        });
        Ok(barrel.add_subscriber(subscriber_id))
    }

    /// Remove a subscription; returns whether one was registered
    pub fn unsubscribe(&self, event_id: &str, subscriber_id: &str) -> bool {
        self.shared
            .barrels
            .read()
            .get(event_id)
            .is_some_and(|barrel| barrel.remove_subscriber(subscriber_id))
    }

    /// Live barrel for an event stream, if any
    pub fn barrel(&self, event_id: &str) -> Option<Arc<Barrel>> {
        self.shared.barrels.read().get(event_id).cloned()
    }

    /// Number of live barrels
    pub fn barrel_count(&self) -> usize {
        self.shared.barrel_count()
    }

    /// Messages ingested since the store was created
    pub fn total_messages(&self) -> u64 {
        self.shared.all_log_count()
    }

    /// Snapshot for the external monitor
    ///
    /// Before the first GC rotation the per-interval figure falls back to the
    /// running count.
    pub fn monitor_data(&self) -> MonitorData {
        let counters = &self.shared.counters;
        let mut messages_per_interval = counters.logs_per_interval.load(Ordering::Relaxed);
        if messages_per_interval == 0 {
            messages_per_interval = counters.total_log_count.load(Ordering::Relaxed);
        }
        MonitorData {
            stream_count: self.shared.barrel_count(),
            messages_per_interval,
        }
    }

    /// Collector exposing the store's gauges to a prometheus registry
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace, subsystem or label make an invalid
    /// metric name.
    pub fn metrics(&self, namespace: &str, subsystem: &str, from: &str) -> StoreResult<StoreMetrics> {
        StoreMetrics::new(Arc::clone(&self.shared), namespace, subsystem, from)
    }

    /// Collect the store's gauges once, without a registry
    pub fn scrape_metrics(
        &self,
        namespace: &str,
        subsystem: &str,
        from: &str,
    ) -> StoreResult<Vec<MetricFamily>> {
        Ok(self.metrics(namespace, subsystem, from)?.collect())
    }

    /// Run one garbage-collection sweep now
    ///
    /// The background task calls this every `gc_interval`.
    pub async fn collect_garbage(&self) -> GcReport {
        self.shared.collect_garbage().await
    }

    /// Flush one barrel now
    pub async fn flush(&self, event_id: &str) -> FlushOutcome {
        let barrel = self.barrel(event_id);
        match barrel {
            Some(barrel) => self.shared.flush_barrel(&barrel).await,
            None => FlushOutcome::Empty,
        }
    }

    /// Check if the background tasks are running
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Start the garbage-collection and persistence-command tasks
    ///
    /// Must be called from within a Tokio runtime.
    #[instrument(skip(self))]
    pub fn run(&self) -> StoreResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyStarted);
        }

        let gc_task = tokio::spawn(run_gc(
            Arc::clone(&self.shared),
            self.shutdown_tx.subscribe(),
        ));
        let command_task = tokio::spawn(run_persistence_commands(
            Arc::clone(&self.shared),
            Arc::clone(&self.command_rx),
            self.shutdown_tx.subscribe(),
        ));

        {
            let mut tasks = self.background_tasks.lock();
            tasks.push(gc_task);
            tasks.push(command_task);
        }

        info!(
            gc_interval_secs = self.shared.config.gc_interval.as_secs(),
            "Event log store started"
        );
        Ok(())
    }

    /// Stop the background tasks and persist every live barrel
    ///
    /// Safe to call on a store that was never started; the flush still runs.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            if self.shutdown_tx.send(()).is_err() {
                debug!("Background tasks already exited before shutdown");
            }

            let tasks = std::mem::take(&mut *self.background_tasks.lock());
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "Event log store task failed");
                }
            }
        }

        let flushed = self.shared.flush_all().await;
        info!(flushed, "Event log store stopped");
    }
}

async fn run_gc(shared: Arc<StoreShared>, mut shutdown_rx: broadcast::Receiver<()>) {
    let period = shared.config.gc_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Event log store gc stopped");
                break;
            }
            _ = interval.tick() => {
                shared.collect_garbage().await;
            }
        }
    }
}

async fn run_persistence_commands(
    shared: Arc<StoreShared>,
    command_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<BarrelCommand>>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut commands = command_rx.lock().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Persistence command task stopped");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                debug!(?command, "Handling persistence command");
                match command {
                    BarrelCommand::Persist(event_id) => {
                        shared.persist(&event_id).await;
                    }
                }
            }
        }
    }
}
