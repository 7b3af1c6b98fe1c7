//! Chain event surface.
//!
//! The chain manager publishes fire-and-forget notifications through the
//! [`EventBus`] capability; the concrete pub/sub fabric is an external
//! collaborator. Events for an imported block are posted only after the
//! block is fully committed, in insertion order.

use crate::core::block::Block;
use crate::core::receipt::Log;
use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Notifications emitted by the chain manager.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    /// A block joined the canonical chain.
    Canonical {
        block: Arc<Block>,
        hash: Hash,
        logs: Vec<Log>,
    },
    /// The canonical head standing after an import batch.
    Head { block: Arc<Block> },
    /// A block was stored on a side branch, or displaced by a reorg.
    Side { block: Arc<Block>, logs: Vec<Log> },
    /// A reorganisation switched the canonical chain onto a new branch;
    /// carries the first block of the adopted branch.
    Split { block: Arc<Block>, logs: Vec<Log> },
    /// Coalesced logs of an import batch.
    Logs(Vec<Log>),
    /// Transactions that fell out of the canonical chain.
    RemovedTransactions(Vec<Transaction>),
    /// Logs that fell out of the canonical chain.
    RemovedLogs(Vec<Log>),
}

/// Fire-and-forget event sink.
///
/// Posting must never block chain progress; slow consumers drop or buffer
/// on their side of the bus.
pub trait EventBus: Send + Sync {
    fn post(&self, event: ChainEvent);
}

/// Bus that discards every event.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn post(&self, _event: ChainEvent) {}
}

/// Bus that records every event in memory.
///
/// Used by tests and by embedders that drain notifications on their own
/// schedule. `wait_for` blocks until a predicate matches a posted event,
/// covering the asynchronously-emitted reorg notifications.
pub struct EventLog {
    events: Mutex<Vec<ChainEvent>>,
    posted: Condvar,
}

impl EventLog {
    /// Creates an empty event log.
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            posted: Condvar::new(),
        }
    }

    /// Returns a copy of everything posted so far.
    pub fn snapshot(&self) -> Vec<ChainEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Removes and returns everything posted so far.
    pub fn take(&self) -> Vec<ChainEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Blocks until some posted event satisfies `pred`, or the timeout
    /// elapses. Returns `true` if a match was seen.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&ChainEvent) -> bool) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut events = self.events.lock().unwrap();
        loop {
            if events.iter().any(&pred) {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .posted
                .wait_timeout(events, deadline - now)
                .unwrap();
            events = guard;
            if result.timed_out() && !events.iter().any(&pred) {
                return false;
            }
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for EventLog {
    fn post(&self, event: ChainEvent) {
        self.events.lock().unwrap().push(event);
        self.posted.notify_all();
    }
}
