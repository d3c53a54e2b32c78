//! Quota-aware versioned key-value storage.

use super::events::{EventBus, EventReceiver, StorageEvent, DEFAULT_EVENT_BUFFER};
use super::file::FilePersistence;
use super::persistence::{MemoryPersistence, Persistence, PersistenceError};
use crate::error::{Result, StoreError};
use crate::types::{Clock, StorageRecord, SystemClock, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Suffix of the side record holding a key's archived versions.
pub const VERSIONS_SUFFIX: &str = "_versions";

/// Storage layer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prepended to every logical key.
    pub prefix: String,

    /// Total attempts for a write failing with a non-quota error.
    /// Default: 3
    pub max_retries: u32,

    /// Fixed pause between attempts.
    /// Default: 1000
    pub retry_delay_ms: u64,

    /// Usage ratio at which writes emit a warning.
    /// Default: 0.8
    pub warning_threshold: f64,

    /// Consult the backend's size before every write.
    pub check_quota_on_write: bool,
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn with_check_quota_on_write(mut self, enabled: bool) -> Self {
        self.check_quota_on_write = enabled;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            max_retries: 3,
            retry_delay_ms: 1000,
            warning_threshold: 0.8,
            check_quota_on_write: true,
        }
    }
}

/// Per-write options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Record expires this long after the write.
    pub ttl: Option<Duration>,

    /// Version number of the value being written.
    pub version: Option<u64>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// Size summary of the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageInfo {
    /// Logical keys, prefix stripped, side records hidden.
    pub keys: Vec<String>,
    pub current_size: u64,
    pub limit_size: u64,
    pub usage_ratio: f64,
}

/// How close usage is to the limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLevel {
    Normal,
    Warning,
    Critical,
}

impl QuotaLevel {
    /// Classify a usage ratio.
    pub fn from_ratio(usage_ratio: f64, warning_threshold: f64) -> Self {
        if usage_ratio >= 1.0 {
            QuotaLevel::Critical
        } else if usage_ratio >= warning_threshold {
            QuotaLevel::Warning
        } else {
            QuotaLevel::Normal
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuotaStatus {
    pub level: QuotaLevel,
    pub usage_ratio: f64,
    pub current_size: u64,
    pub limit_size: u64,
}

/// Outcome of an eviction pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Logical keys removed.
    pub removed: Vec<String>,

    /// Number of key groups considered.
    pub groups: usize,
}

/// Called with every write failure before it is returned.
pub type ErrorHandler = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Versioned key-value store over a [`Persistence`] backend.
///
/// Every value is wrapped in a [`StorageRecord`] under `prefix + key`.
/// Writes retry transient failures and, on a quota failure, run one
/// eviction pass and retry once. Batch operations are sequential and stop
/// at the first error without rolling back.
pub struct Storage {
    persistence: Arc<dyn Persistence>,
    config: StorageConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    error_handler: ErrorHandler,
}

impl Storage {
    pub fn new(persistence: Arc<dyn Persistence>, config: StorageConfig) -> Self {
        Self {
            persistence,
            config,
            clock: Arc::new(SystemClock),
            events: EventBus::new(),
            error_handler: Arc::new(|err: &StoreError| {
                tracing::error!(error = %err, "storage write failed");
            }),
        }
    }

    /// Storage over a fresh [`MemoryPersistence`].
    pub fn in_memory(config: StorageConfig) -> Self {
        Self::new(Arc::new(MemoryPersistence::new()), config)
    }

    /// Storage over a [`FilePersistence`] at `path`.
    pub fn open(path: impl AsRef<Path>, limit_size: u64, config: StorageConfig) -> Result<Self> {
        let persistence = FilePersistence::open(path, limit_size)?;
        Ok(Self::new(Arc::new(persistence), config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Receive [`StorageEvent`]s from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe(DEFAULT_EVENT_BUFFER)
    }

    /// Stop delivering events to `receiver`.
    pub fn unsubscribe(&self, receiver: &EventReceiver) {
        self.events.unsubscribe(receiver.id());
    }

    pub(crate) fn publish(&self, event: StorageEvent) {
        self.events.publish(event);
    }

    // --- Reads ---

    /// Current value of `key`, or `None` when absent or expired.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let full_key = self.full_key(key)?;
        let Some(record) = self.read_record(&full_key)? else {
            return Ok(None);
        };

        if record.is_expired(self.clock.now()) {
            tracing::debug!(key, "record expired on read");
            self.persistence.remove(&full_key)?;
            self.publish(StorageEvent::Expired {
                key: key.to_string(),
            });
            return Ok(None);
        }

        Ok(Some(record.value))
    }

    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Current value of `key` decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Logical keys under the prefix, without version side records.
    pub fn keys(&self) -> Result<Vec<String>> {
        let info = self.persistence.info()?;
        Ok(self.logical_keys(&info.keys))
    }

    /// The value `key` held at `version`.
    pub fn get_version(&self, key: &str, version: u64) -> Result<Option<Value>> {
        let full_key = self.full_key(key)?;

        if let Some(record) = self.read_record(&full_key)? {
            if record.version == Some(version) {
                return Ok(Some(record.value));
            }
        }

        let mut archive = self.read_archive(&full_key)?;
        Ok(archive.remove(&version))
    }

    /// Every version of `key` that can be retrieved, ascending.
    pub fn versions(&self, key: &str) -> Result<Vec<u64>> {
        let full_key = self.full_key(key)?;

        let mut versions: BTreeSet<u64> = self.read_archive(&full_key)?.into_keys().collect();
        if let Some(version) = self.read_record(&full_key)?.and_then(|r| r.version) {
            versions.insert(version);
        }

        Ok(versions.into_iter().collect())
    }

    // --- Writes ---

    pub fn set(&self, key: &str, value: Value, options: SetOptions) -> Result<()> {
        let full_key = self.full_key(key)?;
        let now = self.clock.now();

        if options.version.is_some() {
            self.archive_current(&full_key, now)?;
        }

        let record = StorageRecord {
            value,
            timestamp: now,
            expires: options.ttl.map(|ttl| now.after(ttl)),
            version: options.version,
        };
        self.write(&full_key, serde_json::to_value(record)?)
    }

    /// Encode `value` and store it.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) -> Result<()> {
        self.set(key, serde_json::to_value(value)?, options)
    }

    /// Delete `key` and its archived versions.
    pub fn remove(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key)?;
        self.persistence.remove(&full_key)?;
        self.persistence
            .remove(&format!("{}{}", full_key, VERSIONS_SUFFIX))?;
        Ok(())
    }

    /// Remove every key under the prefix. Returns the number of raw entries
    /// deleted.
    pub fn clear(&self) -> Result<usize> {
        let info = self.persistence.info()?;
        let mut removed = 0;
        for raw in info
            .keys
            .iter()
            .filter(|k| k.starts_with(&self.config.prefix))
        {
            self.persistence.remove(raw)?;
            removed += 1;
        }
        tracing::debug!(removed, "cleared storage");
        Ok(removed)
    }

    // --- Batches ---

    pub fn get_batch<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<Option<Value>>> {
        keys.iter().map(|key| self.get(key.as_ref())).collect()
    }

    pub fn set_batch<K, I>(&self, entries: I, options: SetOptions) -> Result<()>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), value, options)?;
        }
        Ok(())
    }

    pub fn remove_batch<K: AsRef<str>>(&self, keys: &[K]) -> Result<()> {
        for key in keys {
            self.remove(key.as_ref())?;
        }
        Ok(())
    }

    // --- Quota ---

    pub fn info(&self) -> Result<StorageInfo> {
        let info = self.persistence.info()?;
        Ok(StorageInfo {
            keys: self.logical_keys(&info.keys),
            current_size: info.current_size,
            limit_size: info.limit_size,
            usage_ratio: info.usage_ratio(),
        })
    }

    pub fn quota_status(&self) -> Result<QuotaStatus> {
        let info = self.persistence.info()?;
        let usage_ratio = info.usage_ratio();
        Ok(QuotaStatus {
            level: QuotaLevel::from_ratio(usage_ratio, self.config.warning_threshold),
            usage_ratio,
            current_size: info.current_size,
            limit_size: info.limit_size,
        })
    }

    /// Remove the oldest half of every key group.
    ///
    /// A key's group is the part of its logical name before the first `_`.
    /// Within a group records are ordered by write timestamp; records that
    /// cannot be decoded sort first. A group with a single key keeps it.
    /// Running the pass twice in a row is harmless.
    pub fn evict(&self) -> Result<EvictionReport> {
        let info = self.persistence.info()?;

        let mut groups: BTreeMap<String, Vec<(Timestamp, String)>> = BTreeMap::new();
        for logical in self.logical_keys(&info.keys) {
            let full_key = format!("{}{}", self.config.prefix, logical);
            let timestamp = self
                .read_record(&full_key)
                .ok()
                .flatten()
                .map(|record| record.timestamp)
                .unwrap_or_default();
            let group = eviction_group(&logical).to_string();
            groups.entry(group).or_default().push((timestamp, logical));
        }

        let mut report = EvictionReport {
            removed: Vec::new(),
            groups: groups.len(),
        };
        for members in groups.values_mut() {
            members.sort();
            let count = members.len() / 2;
            for (_, logical) in members.iter().take(count) {
                self.remove(logical)?;
                report.removed.push(logical.clone());
            }
        }

        tracing::debug!(
            removed = report.removed.len(),
            groups = report.groups,
            "eviction pass complete"
        );
        self.publish(StorageEvent::Evicted {
            removed: report.removed.len(),
            groups: report.groups,
        });

        Ok(report)
    }

    // --- Internal ---

    /// Keys ending in [`VERSIONS_SUFFIX`] are reserved for version archives.
    fn full_key(&self, key: &str) -> Result<String> {
        if key.is_empty() || key.ends_with(VERSIONS_SUFFIX) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(format!("{}{}", self.config.prefix, key))
    }

    fn logical_keys(&self, raw_keys: &[String]) -> Vec<String> {
        raw_keys
            .iter()
            .filter_map(|raw| raw.strip_prefix(&self.config.prefix))
            .filter(|logical| !logical.is_empty() && !logical.ends_with(VERSIONS_SUFFIX))
            .map(str::to_string)
            .collect()
    }

    fn read_record(&self, full_key: &str) -> Result<Option<StorageRecord<Value>>> {
        match self.persistence.get(full_key)? {
            Some(raw) => serde_json::from_value(raw)
                .map(Some)
                .map_err(|e| StoreError::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn read_archive(&self, full_key: &str) -> Result<BTreeMap<u64, Value>> {
        let archive_key = format!("{}{}", full_key, VERSIONS_SUFFIX);
        match self.persistence.get(&archive_key)? {
            Some(raw) => {
                let record: StorageRecord<BTreeMap<u64, Value>> = serde_json::from_value(raw)
                    .map_err(|e| StoreError::Deserialization(e.to_string()))?;
                Ok(record.value)
            }
            None => Ok(BTreeMap::new()),
        }
    }

    /// Copy the live value into the archive under its own version.
    fn archive_current(&self, full_key: &str, now: Timestamp) -> Result<()> {
        let Some(current) = self.read_record(full_key)? else {
            return Ok(());
        };
        let Some(version) = current.version else {
            return Ok(());
        };

        let mut archive = self.read_archive(full_key)?;
        archive.insert(version, current.value);

        let record = StorageRecord {
            value: archive,
            timestamp: now,
            expires: None,
            version: None,
        };
        let archive_key = format!("{}{}", full_key, VERSIONS_SUFFIX);
        self.write(&archive_key, serde_json::to_value(record)?)
    }

    /// Quota condition seen before a write, if any.
    fn quota_gate(&self) -> Result<Option<PersistenceError>> {
        if !self.config.check_quota_on_write {
            return Ok(None);
        }

        let info = self.persistence.info()?;
        if info.limit_size > 0 && info.current_size >= info.limit_size {
            return Ok(Some(PersistenceError::QuotaExceeded {
                current_size: info.current_size,
                limit_size: info.limit_size,
            }));
        }

        let usage_ratio = info.usage_ratio();
        if usage_ratio >= self.config.warning_threshold {
            tracing::warn!(usage_ratio, "storage usage above warning threshold");
            self.publish(StorageEvent::QuotaWarning {
                usage_ratio,
                current_size: info.current_size,
                limit_size: info.limit_size,
            });
        }

        Ok(None)
    }

    fn write(&self, full_key: &str, value: Value) -> Result<()> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0u32;
        let mut evicted = false;

        loop {
            let outcome = match self.quota_gate()? {
                Some(quota) => Err(quota),
                None => self.persistence.set(full_key, value.clone()),
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(PersistenceError::QuotaExceeded {
                    current_size,
                    limit_size,
                }) => {
                    if evicted {
                        return Err(StoreError::QuotaExceeded {
                            current_size,
                            limit_size,
                        });
                    }
                    tracing::warn!(key = full_key, "quota exceeded, evicting before retry");
                    evicted = true;
                    self.evict()?;
                }
                Err(PersistenceError::Other(message)) => {
                    attempts += 1;
                    if attempts >= max_attempts {
                        let err = StoreError::WriteFailed {
                            key: full_key.to_string(),
                            attempts,
                            message,
                        };
                        (self.error_handler)(&err);
                        return Err(err);
                    }
                    tracing::warn!(key = full_key, attempts, error = %message, "write failed, retrying");
                    std::thread::sleep(self.config.retry_delay());
                }
            }
        }
    }
}

/// Eviction class of a logical key.
fn eviction_group(logical: &str) -> &str {
    logical.split('_').next().unwrap_or(logical)
}
