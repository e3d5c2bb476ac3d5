//! Read-only completion report computed from the checkpoint alone.

use serde::Serialize;

use super::reconcile::reconcile;
use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::config::EntitySpec;

/// Completion of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityStatus {
    /// Listing entity name.
    pub entity: String,
    /// Persisted listing pages.
    pub pages: usize,
    /// Page files that could not be read.
    pub skipped_pages: usize,
    /// Items across persisted pages.
    pub listed: usize,
    /// Distinct identifiers across persisted pages.
    pub unique: usize,
    /// Objects on disk.
    pub stored: usize,
    /// Identifiers still to fetch, threshold applied.
    pub remaining: usize,
    /// Share of eligible identifiers already stored, in percent.
    pub completion_percent: f64,
}

/// Computes the status of `entity`.
///
/// # Errors
///
/// Returns [`CheckpointError`] if pages or objects cannot be listed.
pub async fn entity_status(
    store: &dyn CheckpointStore,
    entity: &EntitySpec,
    min_id: Option<i64>,
) -> Result<EntityStatus, CheckpointError> {
    let scan = store.list_pages(&entity.name).await?;
    let pages = scan.pages;
    let existing = store.list_object_ids(&entity.name).await?;
    let rec = reconcile(&pages, &existing, &entity.identifier_field, min_id);

    let eligible = rec.already_stored + rec.outstanding.len();
    #[allow(clippy::cast_precision_loss)]
    let completion_percent = match (pages.is_empty(), eligible) {
        (true, _) => 0.0,
        (false, 0) => 100.0,
        (false, eligible) => rec.already_stored as f64 * 100.0 / eligible as f64,
    };

    Ok(EntityStatus {
        entity: entity.name.clone(),
        pages: pages.len(),
        skipped_pages: scan.skipped.len(),
        listed: rec.listed,
        unique: rec.unique,
        stored: existing.len(),
        remaining: rec.outstanding.len(),
        completion_percent,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::checkpoint::{FsCheckpointStore, ObjectRecord, Page};

    #[tokio::test]
    async fn test_status_of_fresh_directory() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let status = entity_status(&store, &EntitySpec::new("Plan", json!({})), None)
            .await
            .unwrap();
        assert_eq!(status.pages, 0);
        assert_eq!(status.remaining, 0);
        assert!(status.completion_percent.abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_status_counts_and_threshold() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        let items = [10, 200, 300, 300, 400].iter().map(|n| json!({"id": n})).collect();
        store.put_page(&Page::new("Plan", 0, items)).await.unwrap();
        store
            .put_object(&ObjectRecord::new("Plan", "200", json!({})))
            .await
            .unwrap();

        let entity = EntitySpec::new("Plan", json!({}));
        let all = entity_status(&store, &entity, None).await.unwrap();
        assert_eq!(all.listed, 5);
        assert_eq!(all.unique, 4);
        assert_eq!(all.stored, 1);
        assert_eq!(all.remaining, 3);
        assert!((all.completion_percent - 25.0).abs() < 1e-9);

        let filtered = entity_status(&store, &entity, Some(100)).await.unwrap();
        assert_eq!(filtered.remaining, 2);
        assert!((filtered.completion_percent - 100.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_status_counts_unreadable_pages() {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        store
            .put_page(&Page::new("Plan", 0, vec![json!({"id": 1})]))
            .await
            .unwrap();
        std::fs::write(dir.path().join("pages/Plan/1.json"), "not json").unwrap();

        let status = entity_status(&store, &EntitySpec::new("Plan", json!({})), None)
            .await
            .unwrap();
        assert_eq!(status.pages, 1);
        assert_eq!(status.skipped_pages, 1);
        assert_eq!(status.remaining, 1);
    }
}
