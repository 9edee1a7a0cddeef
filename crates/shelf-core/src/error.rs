//! Error taxonomy for record store operations
//!
//! Local mutation errors propagate synchronously to the caller; sync errors
//! travel over the sync state channel instead (see `sync`).

use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityKind;
use crate::storage::StorageError;

/// Errors surfaced by record store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Bad input, rejected before any mutation happened
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist (stale id)
    #[error("No {kind} with id {id}")]
    NotFound { kind: EntityKind, id: Uuid },

    /// Durable-write failure; fatal, never swallowed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(StorageError::Database(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Storage(StorageError::Serialization(e.to_string()))
    }
}

/// Result type for record store operations
pub type StoreResult<T> = Result<T, StoreError>;
