/*!
Error types for the Rewind snapshot store.
*/

use crate::config::BackendKind;
use thiserror::Error;

/// Result type used throughout the Rewind core.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during snapshot store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors raised by the indexed SQLite backend
    #[cfg(feature = "indexed")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Compression/decompression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompressed payload does not match the recorded content hash
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Invalid snapshot format
    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    /// An operation needed a snapshot that does not exist
    #[error("Snapshot not found: {execution_id}")]
    NotFound { execution_id: String },

    /// The selected backend could not be opened
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: BackendKind, reason: String },

    /// Host bridge call failures
    #[error("Bridge call '{command}' failed: {message}")]
    Bridge { command: String, message: String },

    /// Storage adapter errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Persisted state that cannot be read back; retrying will not help
    #[error("Corrupt store state: {0}")]
    Corrupt(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl StoreError {
    /// Create a new compression error
    pub fn compression<S: Into<String>>(msg: S) -> Self {
        Self::Compression(msg.into())
    }

    /// Create a new storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new corrupt-state error
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(execution_id: S) -> Self {
        Self::NotFound {
            execution_id: execution_id.into(),
        }
    }

    /// Create a new backend-unavailable error
    pub fn backend_unavailable<S: Into<String>>(backend: BackendKind, reason: S) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Create a new bridge error
    pub fn bridge<C: Into<String>, M: Into<String>>(command: C, message: M) -> Self {
        Self::Bridge {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Only adapter I/O failures qualify; malformed input, missing records,
    /// corrupt state and codec failures will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Storage(_) | Self::Bridge { .. } => true,
            #[cfg(feature = "indexed")]
            Self::Database(_) => true,
            _ => false,
        }
    }
}

impl rewind_retry::RetryableError for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}
