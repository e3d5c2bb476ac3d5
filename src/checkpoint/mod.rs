//! Durable checkpoint of fetched listing pages and objects.
//!
//! The checkpoint is both the resumability ledger and the dedup index:
//! an object that exists on disk is never requested again.
//!
//! # Overview
//!
//! - [`CheckpointStore`] - Storage seam used by the crawler, reconciler and fetcher
//! - [`FsCheckpointStore`] - One JSON file per page and per object
//! - [`Page`] / [`ObjectRecord`] - Persisted units
//! - [`PageScan`] - Readable pages plus skipped page indexes
//! - [`CheckpointError`] - Storage failures
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::checkpoint::{CheckpointStore, FsCheckpointStore, ObjectRecord};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), harvester_core::checkpoint::CheckpointError> {
//! let store = FsCheckpointStore::new("raw");
//! let written = store
//!     .put_object(&ObjectRecord::new("Plan", "38901", json!({"id": 38901})))
//!     .await?;
//! assert!(written || store.has_object("Plan", "38901").await?);
//! # Ok(())
//! # }
//! ```

mod error;
mod fs;
mod store;

pub use error::CheckpointError;
pub use fs::FsCheckpointStore;
pub use store::{CheckpointStore, ObjectRecord, Page, PageScan};

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;
