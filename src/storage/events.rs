//! In-process broadcast of storage conditions.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Something the storage layer wants observers to know about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEvent {
    /// Usage crossed the warning threshold.
    QuotaWarning {
        usage_ratio: f64,
        current_size: u64,
        limit_size: u64,
    },

    /// Usage reached the limit.
    QuotaCritical {
        usage_ratio: f64,
        current_size: u64,
        limit_size: u64,
    },

    /// An eviction pass finished.
    Evicted { removed: usize, groups: usize },

    /// A record was found expired on read and deleted.
    Expired { key: String },
}

/// Receiving side of a subscription.
pub struct EventReceiver {
    id: u64,
    receiver: Receiver<StorageEvent>,
}

impl EventReceiver {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, if one is already queued.
    pub fn try_recv(&self) -> Option<StorageEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<StorageEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<StorageEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Fan-out of [`StorageEvent`]s to bounded subscribers.
///
/// A subscriber whose buffer is full, or whose receiver was dropped, is
/// removed on the next publish.
pub struct EventBus {
    senders: RwLock<HashMap<u64, Sender<StorageEvent>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, buffer_size: usize) -> EventReceiver {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = bounded(buffer_size.max(1));
        self.senders.write().insert(id, sender);
        EventReceiver { id, receiver }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.senders.write().remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.read().len()
    }

    pub fn publish(&self, event: StorageEvent) {
        let mut to_remove = Vec::new();

        {
            let senders = self.senders.read();
            for (id, sender) in senders.iter() {
                if sender.try_send(event.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            tracing::debug!(dropped = to_remove.len(), "dropping storage event subscribers");
            let mut senders = self.senders.write();
            for id in to_remove {
                senders.remove(&id);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
