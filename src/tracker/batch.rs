//! Applying change batches to a destination.

use crate::error::{Result, StoreError};
use crate::storage::{SetOptions, Storage};
use crate::types::{ChangeBatch, ChangeKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Destination for applied changes.
pub trait DataSink {
    fn set(&self, collection: &str, id: &str, data: &Value) -> Result<()>;

    fn remove(&self, collection: &str, id: &str) -> Result<()>;
}

/// Per-collection apply counts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    pub total: usize,
    pub applied: usize,
    pub failed: usize,
}

/// One entity that could not be applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub collection: String,
    pub id: String,
    pub error: String,
}

/// Outcome of [`apply_change_batch`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub total: usize,
    pub applied: usize,
    pub failed: usize,
    pub collections: BTreeMap<String, ApplyStats>,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyReport {
    /// True when nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Push every entry of `batch` into `sink`.
///
/// Creates and updates write the entry's full `data` snapshot; the stored
/// diff is not consulted. Deletes remove the entity. A failing entity is
/// recorded in the report and the rest of the batch still runs.
pub fn apply_change_batch(batch: &ChangeBatch, sink: &dyn DataSink) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (collection, entries) in &batch.changes {
        let stats = report.collections.entry(collection.clone()).or_default();

        for (id, entry) in entries {
            stats.total += 1;
            report.total += 1;

            let outcome = match entry.kind {
                ChangeKind::Create | ChangeKind::Update => match entry.data {
                    Some(ref data) => sink.set(collection, id, data),
                    None => Err(StoreError::InvalidOperation(format!(
                        "{} entry has no data",
                        entry.kind
                    ))),
                },
                ChangeKind::Delete => sink.remove(collection, id),
            };

            match outcome {
                Ok(()) => {
                    stats.applied += 1;
                    report.applied += 1;
                }
                Err(e) => {
                    tracing::warn!(collection = %collection, id = %id, error = %e, "failed to apply change");
                    stats.failed += 1;
                    report.failed += 1;
                    report.failures.push(ApplyFailure {
                        collection: collection.clone(),
                        id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    tracing::debug!(
        total = report.total,
        applied = report.applied,
        failed = report.failed,
        "applied change batch"
    );
    report
}

/// In-memory collections, handy as a sync target in tests.
#[derive(Default)]
pub struct MemorySink {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    failing: RwLock<BTreeSet<(String, String)>>,
    calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `(collection, id)` fail.
    pub fn fail_on(&self, collection: &str, id: &str) {
        self.failing
            .write()
            .insert((collection.to_string(), id.to_string()));
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .read()
            .get(collection)
            .and_then(|entries| entries.get(id))
            .cloned()
    }

    pub fn collection(&self, collection: &str) -> BTreeMap<String, Value> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `set`/`remove` invocations, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, collection: &str, id: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .read()
            .contains(&(collection.to_string(), id.to_string()))
        {
            return Err(StoreError::Sink(format!("rejected {}/{}", collection, id)));
        }
        Ok(())
    }
}

impl DataSink for MemorySink {
    fn set(&self, collection: &str, id: &str, data: &Value) -> Result<()> {
        self.check(collection, id)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data.clone());
        Ok(())
    }

    fn remove(&self, collection: &str, id: &str) -> Result<()> {
        self.check(collection, id)?;
        let mut collections = self.collections.write();
        if let Some(entries) = collections.get_mut(collection) {
            entries.remove(id);
            if entries.is_empty() {
                collections.remove(collection);
            }
        }
        Ok(())
    }
}

/// Writes entities into a [`Storage`] under `collection_id` keys, so that
/// eviction groups them by collection.
pub struct StorageSink {
    storage: Arc<Storage>,
}

impl StorageSink {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn key(collection: &str, id: &str) -> String {
        format!("{}_{}", collection, id)
    }
}

impl DataSink for StorageSink {
    fn set(&self, collection: &str, id: &str, data: &Value) -> Result<()> {
        self.storage
            .set(&Self::key(collection, id), data.clone(), SetOptions::new())
    }

    fn remove(&self, collection: &str, id: &str) -> Result<()> {
        self.storage.remove(&Self::key(collection, id))
    }
}
