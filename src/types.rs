//! Core types shared by the storage layer and the change tracker.

use crate::diff::DiffNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }

    /// This timestamp shifted forward by `duration`.
    pub fn after(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_millis() as i64))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now.load(Ordering::SeqCst))
    }
}

/// The wrapper written for every stored key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord<T> {
    pub value: T,

    /// Refreshed on every write.
    pub timestamp: Timestamp,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Timestamp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl<T> StorageRecord<T> {
    /// True once `expires` has passed.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires.map_or(false, |at| at <= now)
    }
}

/// Kind of a tracked mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Latest pending mutation for one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEntry {
    #[serde(rename = "type")]
    pub kind: ChangeKind,

    pub timestamp: Timestamp,

    /// Full new snapshot (create/update).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Structural delta from the previous snapshot (update only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffNode>,

    /// Snapshot before deletion, kept only when configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_data: Option<Value>,
}

/// Pending changes for one collection, keyed by entity id.
pub type CollectionChanges = BTreeMap<String, ChangeEntry>;

/// All pending changes: collection -> id -> entry.
pub type ChangeLog = BTreeMap<String, CollectionChanges>;

/// Snapshot of pending changes prepared for transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub changes: ChangeLog,
    pub timestamp: Timestamp,
    pub collections: Vec<String>,
}

impl ChangeBatch {
    /// Number of entities in the batch.
    pub fn len(&self) -> usize {
        self.changes.values().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
