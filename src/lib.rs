//! # Delta Store
//!
//! Local-first change tracking with structural JSON diffs, on top of a
//! quota-aware versioned key-value store.
//!
//! ## Core Concepts
//!
//! - **Diff**: Path-addressed structural diffs and patches for JSON trees
//! - **Storage**: Key-value records with expiry, version archives and eviction
//! - **Tracker**: Latest pending change per entity, packaged into sync batches
//!
//! ## Example
//!
//! ```
//! use delta_store::{ChangeTracker, MemorySink, Storage, StorageConfig, TrackerConfig};
//! use delta_store::tracker::BatchOptions;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(Storage::in_memory(StorageConfig::default()));
//! let tracker = ChangeTracker::new(storage, TrackerConfig::default());
//!
//! tracker.track_change("users", "u1", Some(&json!({"name": "B"})), Some(&json!({"name": "A"})), None)?;
//!
//! let batch = tracker
//!     .generate_change_batch(&BatchOptions::new().clear_after_generate(true))?
//!     .expect("one pending change");
//!
//! let sink = MemorySink::new();
//! let report = tracker.apply_change_batch(&batch, &sink);
//! assert_eq!(report.applied, 1);
//! assert_eq!(sink.get("users", "u1"), Some(json!({"name": "B"})));
//! # Ok::<(), delta_store::StoreError>(())
//! ```

pub mod config;
pub mod diff;
pub mod error;
pub mod storage;
pub mod tracker;
pub mod types;

// Re-exports
pub use config::EngineConfig;
pub use diff::{diff, patch, ChangeOp, DiffFormat, DiffNode, DiffOptions, Move};
pub use error::{Result, StoreError};
pub use storage::{
    FilePersistence, MemoryPersistence, Persistence, QuotaConfig, QuotaMonitor, SetOptions,
    Storage, StorageConfig, StorageEvent,
};
pub use tracker::{ApplyReport, ChangeTracker, DataSink, MemorySink, StorageSink, TrackerConfig};
pub use types::*;
