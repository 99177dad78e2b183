//! Error types for Arkiv core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Arkiv core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Snapshot store error.
    #[error("storage error: {0}")]
    Storage(#[from] arkiv_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON codec error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The key has the wrong shape or exceeds the configured size.
    ///
    /// Recoverable: reported to the caller, no state was mutated.
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// The value exceeds the configured serialized size.
    ///
    /// Recoverable: reported to the caller, no state was mutated.
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// Why the value was rejected.
        reason: String,
    },

    /// A startup consistency check failed.
    ///
    /// Fatal: the engine refuses to serve rather than risk further
    /// corruption.
    #[error("corrupt state: {message}")]
    CorruptState {
        /// Which check failed and how.
        message: String,
    },

    /// A configuration option is outside its valid range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Which option is invalid and why.
        message: String,
    },

    /// The engine has been closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl CoreError {
    /// Creates an invalid-key error.
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }

    /// Creates a corrupt-state error.
    pub fn corrupt_state(message: impl Into<String>) -> Self {
        Self::CorruptState {
            message: message.into(),
        }
    }

    /// Creates an invalid-configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
