//! Health status fan-out.
//!
//! # Responsibilities
//! - Hand out bounded per-subscriber queues
//! - Publish status changes without ever blocking the prober
//!
//! # Design Decisions
//! - A full queue drops the new value; the subscriber still holds the older ones
//! - A closed queue is pruned on the next publish

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Queue depth per subscriber.
pub const LISTENER_CAPACITY: usize = 16;

/// Handle returned by [`Listeners::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<bool>,
}

/// Subscriber registry for one healthcheck.
#[derive(Debug, Default)]
pub struct Listeners {
    next_id: AtomicU64,
    senders: Mutex<HashMap<u64, mpsc::Sender<bool>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(LISTENER_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.senders
            .lock()
            .expect("listeners mutex poisoned")
            .insert(id, tx);
        Subscription { id, rx }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.senders
            .lock()
            .expect("listeners mutex poisoned")
            .remove(&id);
    }

    /// Push `status` to every subscriber without waiting.
    pub fn publish(&self, status: bool) {
        let mut senders = self.senders.lock().expect("listeners mutex poisoned");
        senders.retain(|id, tx| match tx.try_send(status) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(listener = *id, status, "Listener queue full, dropping status");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(listener = *id, "Listener closed, removing");
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.senders.lock().expect("listeners mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
