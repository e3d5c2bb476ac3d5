//! Checkpoint records and the storage seam the engine depends on.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use super::Result;

/// One persisted listing page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Listing entity name.
    pub entity: String,
    /// 0-based page index.
    pub index: u64,
    /// Listing items, stored verbatim.
    pub items: Vec<Value>,
}

impl Page {
    /// Creates a page.
    #[must_use]
    pub fn new(entity: impl Into<String>, index: u64, items: Vec<Value>) -> Self {
        Self {
            entity: entity.into(),
            index,
            items,
        }
    }
}

/// Persisted pages of one entity, plus the indexes of page files that could
/// not be read and were left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageScan {
    /// Readable pages in index order.
    pub pages: Vec<Page>,
    /// Indexes of unreadable page files.
    pub skipped: Vec<u64>,
}

impl PageScan {
    /// Returns whether no page, readable or not, was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.skipped.is_empty()
    }
}

/// One fetched object, keyed by its canonical identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    /// Listing entity name the object belongs to.
    pub entity: String,
    /// Identifier exactly as it appeared in the listing.
    pub identifier: String,
    /// Opaque document returned by the object endpoint.
    pub payload: Value,
}

impl ObjectRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(entity: impl Into<String>, identifier: impl Into<String>, payload: Value) -> Self {
        Self {
            entity: entity.into(),
            identifier: identifier.into(),
            payload,
        }
    }
}

/// Durable ledger of fetched pages and objects.
///
/// The presence of an object is proof that it was fetched; implementations
/// must never overwrite one.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns whether the object is already stored.
    async fn has_object(&self, entity: &str, identifier: &str) -> Result<bool>;

    /// Stores an object unless one already exists.
    ///
    /// Returns `true` when written, `false` when it was already present.
    async fn put_object(&self, record: &ObjectRecord) -> Result<bool>;

    /// Stores a listing page, replacing any page at the same index.
    async fn put_page(&self, page: &Page) -> Result<()>;

    /// Returns every readable page of `entity` in index order.
    ///
    /// An unreadable page is skipped and reported in [`PageScan::skipped`]
    /// rather than failing the whole listing.
    async fn list_pages(&self, entity: &str) -> Result<PageScan>;

    /// Returns the identifiers of every stored object of `entity`.
    async fn list_object_ids(&self, entity: &str) -> Result<HashSet<String>>;
}
