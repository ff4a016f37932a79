//! Error types for the registration store.

use crate::types::RecordId;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Malformed or missing input. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// Role or ownership check failed. Raised before the store is touched and
    /// never says whether the target record exists.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Generic persistence failure; the message is kept for diagnostics.
    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl RegistryError {
    /// True for failures of the underlying persistence layer, as opposed to
    /// caller mistakes (validation, missing ids, access).
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            RegistryError::Store(_)
                | RegistryError::Io(_)
                | RegistryError::Serialization(_)
                | RegistryError::Deserialization(_)
                | RegistryError::ChecksumMismatch { .. }
                | RegistryError::InvalidFormat(_)
                | RegistryError::Locked
                | RegistryError::NotInitialized
        )
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for RegistryError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        RegistryError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for RegistryError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RegistryError::Deserialization(e.to_string())
    }
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
