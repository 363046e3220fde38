//! Waiter table: the rendezvous between blocked callers and the
//! listener.
//!
//! Each synchronous call parks a capacity-1 channel here under its
//! correlation ID. The listener looks entries up under a read lock and
//! hands bodies over with a non-blocking send, so a slow or gone caller
//! can never stall stream consumption.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::correlation::AsyncId;
use crate::domain::types::Delivery;

/// A registered call, held by the blocked caller.
#[derive(Debug)]
pub struct Waiter {
    async_id: AsyncId,
    rx: mpsc::Receiver<Delivery>,
}

impl Waiter {
    /// The correlation ID this waiter is registered under.
    pub fn async_id(&self) -> AsyncId {
        self.async_id
    }

    /// Await the first delivery.
    ///
    /// `None` only if the table entry vanished while still waiting,
    /// which a correct caller (register, await, release) never sees.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

/// Outcome of a dispatch attempt, for the listener's log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Body handed to the waiter.
    Delivered,
    /// Waiter exists but its slot is taken: a duplicate callback, or the
    /// caller already received one. Dropped.
    DroppedFull,
    /// No waiter under this ID in this table. Some other process owns
    /// the call, or it already finished. Dropped.
    NoWaiter,
}

/// Running totals, exposed for logs and tests.
#[derive(Debug, Default)]
pub struct WaiterStats {
    /// Waiters ever registered.
    pub registered: AtomicU64,
    /// Bodies handed to a waiter.
    pub delivered: AtomicU64,
    /// Dispatches dropped (duplicate slot or no waiter).
    pub dropped: AtomicU64,
}

/// Correlation ID → delivery slot, one table per client.
#[derive(Default)]
pub struct WaiterTable {
    // Writers are register/release; the only reader is the listener's
    // lookup.
    entries: RwLock<HashMap<AsyncId, mpsc::Sender<Delivery>>>,
    stats: WaiterStats,
}

impl WaiterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh waiter under `async_id`.
    pub fn insert(&self, async_id: AsyncId) -> Waiter {
        let (tx, rx) = mpsc::channel(1);
        let previous = self.entries.write().insert(async_id, tx);
        // IDs are fresh UUIDs; a collision here is a caller bug.
        debug_assert!(previous.is_none(), "duplicate waiter for {async_id}");
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        Waiter { async_id, rx }
    }

    /// Drop the table entry for a waiter. Idempotent.
    pub fn remove(&self, waiter: &Waiter) {
        self.entries.write().remove(&waiter.async_id);
    }

    /// Try to hand a delivery to the matching waiter.
    ///
    /// Never blocks: the slot has capacity 1 and surplus deliveries are
    /// dropped, which is also what absorbs duplicate callbacks and
    /// arrivals after timeout.
    pub fn dispatch(&self, async_id: AsyncId, delivery: Delivery) -> DispatchOutcome {
        let entries = self.entries.read();
        let Some(slot) = entries.get(&async_id) else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::NoWaiter;
        };
        match slot.try_send(delivery) {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Delivered
            }
            Err(err) => {
                debug!(async_id = %async_id, error = %err, "delivery slot unavailable");
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::DroppedFull
            }
        }
    }

    /// Waiters currently registered.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Running totals.
    pub fn stats(&self) -> &WaiterStats {
        &self.stats
    }
}
