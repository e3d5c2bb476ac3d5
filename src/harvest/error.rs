//! Entity-level errors.
//!
//! Per-page and per-identifier failures never surface here; they are
//! counted in reports. A [`HarvestError`] aborts one entity only.

use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::transport::TransportError;

/// Errors that abort harvesting an entity (or the whole run, at setup).
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The first listing page could not be fetched.
    #[error("listing for {entity} failed on the first page: {source}")]
    Listing {
        /// Entity being crawled.
        entity: String,
        /// The final transport error.
        #[source]
        source: TransportError,
    },

    /// The checkpoint store could not be read.
    #[error("checkpoint error for {entity}: {source}")]
    Checkpoint {
        /// Entity being processed.
        entity: String,
        /// The underlying storage error.
        #[source]
        source: CheckpointError,
    },

    /// A worker task panicked or was cancelled where the entity could not
    /// recover.
    #[error("task failure for {entity}: {reason}")]
    Task {
        /// Entity being processed.
        entity: String,
        /// Description of the join failure.
        reason: String,
    },

    /// The task pool semaphore was closed.
    #[error("task pool closed unexpectedly")]
    PoolClosed,

    /// The transport could not be constructed.
    #[error("transport setup failed: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl HarvestError {
    /// Creates a checkpoint error for `entity`.
    pub fn checkpoint(entity: impl Into<String>, source: CheckpointError) -> Self {
        Self::Checkpoint {
            entity: entity.into(),
            source,
        }
    }
}
