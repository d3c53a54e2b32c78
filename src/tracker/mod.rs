//! Change tracking and sync batches.

mod batch;
mod manager;
mod types;

pub use batch::{apply_change_batch, ApplyFailure, ApplyReport, ApplyStats, DataSink, MemorySink, StorageSink};
pub use manager::ChangeTracker;
pub use types::{BatchOptions, ChangeFilter, TrackerConfig};
