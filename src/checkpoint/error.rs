//! Error types for checkpoint persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`CheckpointStore`](super::CheckpointStore).
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem failure reading or writing a checkpoint file.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A document could not be serialized for storage.
    #[error("failed to serialize {path}: {source}")]
    Serialize {
        /// Target path of the write.
        path: PathBuf,
        /// The JSON serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A persisted page could not be read back.
    #[error("corrupt page file {path}: {reason}")]
    CorruptPage {
        /// Path of the unreadable page.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// An entity name or identifier cannot be used as a file name.
    #[error("invalid {kind} {value:?}: cannot be used as a storage key")]
    InvalidKey {
        /// `"entity"` or `"identifier"`.
        kind: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl CheckpointError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a serialization error.
    pub fn serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialize {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt-page error.
    pub fn corrupt_page(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptPage {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid-key error.
    pub fn invalid_key(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidKey {
            kind,
            value: value.into(),
        }
    }
}
