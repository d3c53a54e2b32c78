//! Error types for the change tracker and storage layer.

use thiserror::Error;

/// Main error type for storage and tracking operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Storage quota exceeded: {current_size} of {limit_size} bytes in use")]
    QuotaExceeded { current_size: u64, limit_size: u64 },

    #[error("Write to {key:?} failed after {attempts} attempt(s): {message}")]
    WriteFailed {
        key: String,
        attempts: u32,
        message: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Data sink error: {0}")]
    Sink(String),
}

impl StoreError {
    /// True for the quota-exceeded condition.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for storage and tracking operations.
pub type Result<T> = std::result::Result<T, StoreError>;
