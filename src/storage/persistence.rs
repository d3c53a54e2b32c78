//! The synchronous persistence primitive under [`Storage`](super::Storage).

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Default size limit for in-memory persistence (10MB).
pub const DEFAULT_LIMIT_SIZE: u64 = 10 * 1024 * 1024;

/// Failure of a single persistence call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("quota exceeded ({current_size} of {limit_size} bytes)")]
    QuotaExceeded { current_size: u64, limit_size: u64 },

    #[error("{0}")]
    Other(String),
}

impl From<PersistenceError> for crate::error::StoreError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::QuotaExceeded {
                current_size,
                limit_size,
            } => crate::error::StoreError::QuotaExceeded {
                current_size,
                limit_size,
            },
            PersistenceError::Other(message) => crate::error::StoreError::Persistence(message),
        }
    }
}

/// Size introspection of a persistence backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistenceInfo {
    pub keys: Vec<String>,
    pub current_size: u64,
    pub limit_size: u64,
}

impl PersistenceInfo {
    /// `current_size / limit_size`; zero when no limit is reported.
    pub fn usage_ratio(&self) -> f64 {
        if self.limit_size == 0 {
            0.0
        } else {
            self.current_size as f64 / self.limit_size as f64
        }
    }
}

/// A synchronous key-value persistence backend.
///
/// Keys are raw (already prefixed) strings; values are JSON documents.
pub trait Persistence: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError>;

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError>;

    fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    fn info(&self) -> Result<PersistenceInfo, PersistenceError>;
}

/// Bytes an entry is charged against the limit.
pub(crate) fn entry_size(key: &str, value: &Value) -> u64 {
    let value_len = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
    (key.len() + value_len) as u64
}

struct MemoryState {
    entries: BTreeMap<String, Value>,
    current_size: u64,
    size_override: Option<u64>,
}

/// In-memory persistence with byte accounting against a size limit.
pub struct MemoryPersistence {
    state: RwLock<MemoryState>,
    limit_size: u64,
    failing_writes: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_LIMIT_SIZE)
    }

    pub fn with_limit(limit_size: u64) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                entries: BTreeMap::new(),
                current_size: 0,
                size_override: None,
            }),
            limit_size,
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Force the size reported by `info` and used for the quota check on
    /// write. `None` restores real accounting.
    pub fn override_size(&self, current_size: Option<u64>) {
        self.state.write().size_override = current_size;
    }

    /// Make the next `count` writes fail with [`PersistenceError::Other`].
    pub fn fail_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl Persistence for MemoryPersistence {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        Ok(self.state.read().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        if self.take_injected_failure() {
            return Err(PersistenceError::Other(format!("injected write failure for {}", key)));
        }

        let mut state = self.state.write();
        let previous = state
            .entries
            .get(key)
            .map(|old| entry_size(key, old))
            .unwrap_or(0);
        let incoming = entry_size(key, &value);
        let base = state.size_override.unwrap_or(state.current_size);
        let projected = base.saturating_sub(previous) + incoming;

        if projected > self.limit_size {
            return Err(PersistenceError::QuotaExceeded {
                current_size: base,
                limit_size: self.limit_size,
            });
        }

        state.current_size = state.current_size.saturating_sub(previous) + incoming;
        state.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut state = self.state.write();
        if let Some(old) = state.entries.remove(key) {
            let freed = entry_size(key, &old);
            state.current_size = state.current_size.saturating_sub(freed);
        }
        Ok(())
    }

    fn info(&self) -> Result<PersistenceInfo, PersistenceError> {
        let state = self.state.read();
        Ok(PersistenceInfo {
            keys: state.entries.keys().cloned().collect(),
            current_size: state.size_override.unwrap_or(state.current_size),
            limit_size: self.limit_size,
        })
    }
}
