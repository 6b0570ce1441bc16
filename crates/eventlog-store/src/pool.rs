//! Reuse pool for barrels
//!
//! Short-lived event streams make barrel allocation a hot path. The pool keeps
//! up to `capacity` emptied barrels and hands them back out on demand. It never
//! returns a barrel carrying state from a previous stream.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::barrel::Barrel;

/// Pool of emptied [`Barrel`]s
#[derive(Debug)]
pub struct BarrelPool {
    idle: Mutex<Vec<Barrel>>,
    capacity: usize,
    buffer_limit: usize,
    queue_capacity: usize,
    created: AtomicUsize,
    reused: AtomicUsize,
}

impl BarrelPool {
    /// Create a pool producing barrels with the given limits
    pub fn new(capacity: usize, buffer_limit: usize, queue_capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            buffer_limit,
            queue_capacity,
            created: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
        }
    }

    /// Take a barrel for `event_id`, reusing an emptied one when available
    pub fn acquire(&self, event_id: &str) -> Barrel {
        let mut barrel = match self.idle.lock().pop() {
            Some(barrel) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                barrel
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Barrel::new(self.buffer_limit, self.queue_capacity)
            }
        };
        barrel.assign(event_id);
        trace!(event_id, "Barrel acquired");
        barrel
    }

    /// Return an emptied barrel; returns whether it was kept
    ///
    /// Barrels still carrying stream state are refused and dropped, as are
    /// barrels beyond the pool's capacity.
    pub fn release(&self, mut barrel: Barrel) -> bool {
        if !barrel.is_clean() {
            warn!("Refusing to pool a barrel that still holds stream state");
            return false;
        }

        let mut idle = self.idle.lock();
        if idle.len() >= self.capacity {
            return false;
        }
        idle.push(barrel);
        true
    }

    /// Number of emptied barrels ready for reuse
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Barrels constructed because the pool was empty
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Barrels served from the pool
    pub fn reused_count(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}
