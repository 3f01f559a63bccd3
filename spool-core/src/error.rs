/*!
Error types for the Spool core engine.
*/

use spool_retry::RetryableError;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type used throughout the Spool core.
pub type Result<T> = std::result::Result<T, SpoolError>;

/// Errors that can occur while mutating, flushing or recovering a buffer.
#[derive(Error, Debug)]
pub enum SpoolError {
    /// Read or remove on an empty collection
    #[error("collection is empty")]
    EmptyCollection,

    /// Flush requested while persistence is switched off
    #[error("persistence is not enabled")]
    PersistenceDisabled,

    /// Recovery requested while recovery is switched off
    #[error("recovery is not enabled")]
    RecoveryDisabled,

    /// No backing file is bound to the buffer
    #[error("no backing file is bound to the buffer")]
    NoBackingFile,

    /// Encoded record does not fit the frame's length field
    #[error("record of {size} bytes exceeds the frame length field")]
    RecordTooLarge { size: usize },

    /// Reconcile was asked to drop a record that was never flushed
    #[error("record was never persisted")]
    NotPersisted,

    /// Retained region overlaps the metadata header
    #[error("retained offset {offset} reaches into the metadata region")]
    OffsetBelowMetadataRegion { offset: u64 },

    /// Backing file content is inconsistent
    #[error("corrupt backing file: {0}")]
    CorruptFile(String),

    /// Recovery attempted before the record type was registered
    #[error("record type must be registered before recovery")]
    TypeNotRegistered,

    /// The buffer is already bound to another file
    #[error("cannot bind {requested:?}: already bound to {existing:?}; use rebind to force it")]
    PathConflict { requested: PathBuf, existing: PathBuf },

    /// The file already backs another live buffer
    #[error("cannot bind {path:?}: it backs buffer {owner}; use rebind to force it")]
    PathInUse { path: PathBuf, owner: Uuid },

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl SpoolError {
    /// Create a new corrupt file error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::CorruptFile(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True for errors signalling a damaged file rather than a usage mistake
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            SpoolError::CorruptFile(_) | SpoolError::OffsetBelowMetadataRegion { .. }
        )
    }
}

impl RetryableError for SpoolError {
    fn is_transient(&self) -> bool {
        match self {
            SpoolError::Io(err) => err.is_transient(),
            _ => false,
        }
    }
}
