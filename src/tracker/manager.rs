//! The change tracker.

use super::batch::{apply_change_batch, ApplyReport, DataSink};
use super::types::{BatchOptions, ChangeFilter, TrackerConfig};
use crate::diff::diff;
use crate::error::{Result, StoreError};
use crate::storage::{SetOptions, Storage};
use crate::types::{ChangeBatch, ChangeEntry, ChangeKind, ChangeLog, Clock, CollectionChanges, Timestamp};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Records the latest pending mutation per entity and packages pending
/// mutations into batches.
///
/// The whole log is one document under `config.namespace` in the backing
/// [`Storage`]. Every mutating call loads it, edits it and writes it back
/// while holding an internal lock.
pub struct ChangeTracker {
    storage: Arc<Storage>,
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write of the log.
    write_lock: Mutex<()>,
}

impl ChangeTracker {
    /// Tracker over `storage`, sharing its clock.
    pub fn new(storage: Arc<Storage>, config: TrackerConfig) -> Self {
        let clock = storage.clock();
        Self {
            storage,
            config,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Record a mutation of `collection/id`.
    ///
    /// When `kind` is `None` it is inferred from which snapshots are given:
    /// only `new` is a create, both is an update, only `old` is a delete and
    /// neither is a no-op. An update whose diff is empty is not recorded.
    /// Returns whether an entry was written.
    pub fn track_change(
        &self,
        collection: &str,
        id: &str,
        new_data: Option<&Value>,
        old_data: Option<&Value>,
        kind: Option<ChangeKind>,
    ) -> Result<bool> {
        if collection.is_empty() || id.is_empty() {
            return Err(StoreError::InvalidOperation(
                "collection and id must not be empty".into(),
            ));
        }

        let kind = match kind {
            Some(kind) => kind,
            None => match (old_data, new_data) {
                (None, Some(_)) => ChangeKind::Create,
                (Some(_), Some(_)) => ChangeKind::Update,
                (Some(_), None) => ChangeKind::Delete,
                (None, None) => return Ok(false),
            },
        };

        let entry = match self.build_entry(kind, new_data, old_data)? {
            Some(entry) => entry,
            None => {
                tracing::debug!(collection, id, "update without changes ignored");
                return Ok(false);
            }
        };

        let _guard = self.write_lock.lock();
        let mut log = self.load()?;
        log.entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), entry);
        self.enforce_limit(&mut log, (collection, id));
        self.save(&log)?;

        tracing::debug!(collection, id, %kind, "tracked change");
        Ok(true)
    }

    fn build_entry(
        &self,
        kind: ChangeKind,
        new_data: Option<&Value>,
        old_data: Option<&Value>,
    ) -> Result<Option<ChangeEntry>> {
        let timestamp = self.clock.now();

        let entry = match kind {
            ChangeKind::Create | ChangeKind::Update => {
                let data = new_data.ok_or_else(|| {
                    StoreError::InvalidOperation(format!("{} requires new data", kind))
                })?;

                let node = match (kind, old_data) {
                    (ChangeKind::Update, Some(old)) => {
                        let node = diff(old, data, &self.config.diff);
                        if node.is_empty() {
                            return Ok(None);
                        }
                        Some(node)
                    }
                    _ => None,
                };

                ChangeEntry {
                    kind,
                    timestamp,
                    data: Some(data.clone()),
                    diff: node,
                    original_data: None,
                }
            }
            ChangeKind::Delete => ChangeEntry {
                kind,
                timestamp,
                data: None,
                diff: None,
                original_data: if self.config.include_original_data {
                    old_data.cloned()
                } else {
                    None
                },
            },
        };

        Ok(Some(entry))
    }

    /// Drop the globally oldest entries until the cap holds.
    ///
    /// `latest` is the entry just written. It is never a candidate, since it
    /// may share its timestamp with older entries.
    fn enforce_limit(&self, log: &mut ChangeLog, latest: (&str, &str)) {
        let total: usize = log.values().map(|c| c.len()).sum();
        let cap = self.config.max_changes.max(1);
        if total <= cap {
            return;
        }

        let mut all: Vec<(Timestamp, String, String)> = log
            .iter()
            .flat_map(|(collection, entries)| {
                entries
                    .iter()
                    .map(move |(id, entry)| (entry.timestamp, collection.clone(), id.clone()))
            })
            .filter(|(_, collection, id)| (collection.as_str(), id.as_str()) != latest)
            .collect();
        all.sort();

        let excess = total - cap;
        for (_, collection, id) in all.into_iter().take(excess) {
            if let Some(entries) = log.get_mut(&collection) {
                entries.remove(&id);
                if entries.is_empty() {
                    log.remove(&collection);
                }
            }
        }

        tracing::debug!(evicted = excess, "change log over capacity");
    }

    // --- Queries ---

    /// The pending change of `collection/id`, if it passes `filter`.
    pub fn get_change(
        &self,
        collection: &str,
        id: &str,
        filter: &ChangeFilter,
    ) -> Result<Option<ChangeEntry>> {
        let mut log = self.load()?;
        Ok(log
            .get_mut(collection)
            .and_then(|entries| entries.remove(id))
            .filter(|entry| filter.matches(entry)))
    }

    pub fn get_collection_changes(
        &self,
        collection: &str,
        filter: &ChangeFilter,
    ) -> Result<CollectionChanges> {
        let mut log = self.load()?;
        let entries = log.remove(collection).unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter(|(_, entry)| filter.matches(entry))
            .collect())
    }

    /// Every pending change passing `filter`; collections left empty are
    /// omitted.
    pub fn get_all_changes(&self, filter: &ChangeFilter) -> Result<ChangeLog> {
        let log = self.load()?;
        Ok(filter_log(log, |_| true, filter))
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.load()?.values().map(|c| c.len()).sum())
    }

    /// Collections with pending changes.
    pub fn collections(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    // --- Clearing ---

    /// Returns whether an entry was removed.
    pub fn clear_change(&self, collection: &str, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut log = self.load()?;

        let Some(entries) = log.get_mut(collection) else {
            return Ok(false);
        };
        let removed = entries.remove(id).is_some();
        if entries.is_empty() {
            log.remove(collection);
        }

        if removed {
            self.save(&log)?;
        }
        Ok(removed)
    }

    /// Returns the number of entries removed.
    pub fn clear_collection(&self, collection: &str) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut log = self.load()?;

        let removed = log.remove(collection).map_or(0, |entries| entries.len());
        if removed > 0 {
            self.save(&log)?;
        }
        Ok(removed)
    }

    /// Returns the number of entries removed.
    pub fn clear_all(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let log = self.load()?;

        let removed = log.values().map(|c| c.len()).sum();
        self.save(&ChangeLog::new())?;
        Ok(removed)
    }

    // --- Batches ---

    /// Snapshot the pending changes selected by `options`.
    ///
    /// Returns `None` when nothing matches. With `clear_after_generate` the
    /// captured entries are deleted after the snapshot is taken. The two
    /// steps are not atomic: if the purge is lost the same entries are sent
    /// again, so delivery is at least once.
    pub fn generate_change_batch(&self, options: &BatchOptions) -> Result<Option<ChangeBatch>> {
        let _guard = self.write_lock.lock();
        let mut log = self.load()?;

        let filter = options.entry_filter();
        let changes = filter_log(log.clone(), |name| options.includes_collection(name), &filter);
        if changes.is_empty() {
            return Ok(None);
        }

        let batch = ChangeBatch {
            collections: changes.keys().cloned().collect(),
            changes,
            timestamp: self.clock.now(),
        };

        tracing::debug!(
            entries = batch.len(),
            collections = batch.collections.len(),
            "generated change batch"
        );

        if options.clear_after_generate {
            for (collection, entries) in &batch.changes {
                if let Some(pending) = log.get_mut(collection) {
                    for id in entries.keys() {
                        pending.remove(id);
                    }
                    if pending.is_empty() {
                        log.remove(collection);
                    }
                }
            }
            self.save(&log)?;
        }

        Ok(Some(batch))
    }

    /// Apply `batch` to `sink`. See [`apply_change_batch`].
    pub fn apply_change_batch(&self, batch: &ChangeBatch, sink: &dyn DataSink) -> ApplyReport {
        apply_change_batch(batch, sink)
    }

    // --- Persistence ---

    fn load(&self) -> Result<ChangeLog> {
        Ok(self
            .storage
            .get_as::<ChangeLog>(&self.config.namespace)?
            .unwrap_or_default())
    }

    fn save(&self, log: &ChangeLog) -> Result<()> {
        if log.is_empty() {
            return self.storage.remove(&self.config.namespace);
        }
        self.storage
            .set_as(&self.config.namespace, log, SetOptions::new())
    }
}

fn filter_log<F>(log: ChangeLog, include: F, filter: &ChangeFilter) -> ChangeLog
where
    F: Fn(&str) -> bool,
{
    log.into_iter()
        .filter(|(collection, _)| include(collection.as_str()))
        .map(|(collection, entries)| {
            let kept: CollectionChanges = entries
                .into_iter()
                .filter(|(_, entry)| filter.matches(entry))
                .collect();
            (collection, kept)
        })
        .filter(|(_, entries)| !entries.is_empty())
        .collect()
}
