//! Quota-aware versioned key-value storage.
//!
//! [`Storage`] wraps a synchronous [`Persistence`] backend. It adds
//! expiry, version archives, retrying writes, eviction under quota pressure
//! and an event stream. [`QuotaMonitor`] enforces the quota in the
//! background.

mod events;
mod file;
mod persistence;
mod quota;
mod store;

pub use events::{EventBus, EventReceiver, StorageEvent, DEFAULT_EVENT_BUFFER};
pub use file::FilePersistence;
pub use persistence::{
    MemoryPersistence, Persistence, PersistenceError, PersistenceInfo, DEFAULT_LIMIT_SIZE,
};
pub use quota::{check_quota, ConfirmPrompt, MonitorHandle, QuotaCheck, QuotaConfig, QuotaMonitor};
pub use store::{
    ErrorHandler, EvictionReport, QuotaLevel, QuotaStatus, SetOptions, Storage, StorageConfig,
    StorageInfo, VERSIONS_SUFFIX,
};
