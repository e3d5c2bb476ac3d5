//! Filesystem-backed checkpoint store.
//!
//! Layout under the data directory:
//!
//! ```text
//! <root>/pages/<entity>/<index>.json     {"content": [...]}
//! <root>/objects/<entity>/<id>.json      opaque object document
//! ```
//!
//! Files are written to a uniquely named hidden temporary file first and
//! then renamed into place, so a crash can never leave a truncated object
//! that looks complete.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument, trace, warn};

use super::error::CheckpointError;
use super::store::{CheckpointStore, ObjectRecord, Page, PageScan};
use super::Result;

const PAGES_DIR: &str = "pages";
const OBJECTS_DIR: &str = "objects";
const FILE_EXTENSION: &str = ".json";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// [`CheckpointStore`] over a directory tree.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Data directory root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the listing pages of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidKey`] for unusable entity names.
    pub fn pages_dir(&self, entity: &str) -> Result<PathBuf> {
        validate_key("entity", entity)?;
        Ok(self.root.join(PAGES_DIR).join(entity))
    }

    /// Directory holding the objects of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::InvalidKey`] for unusable entity names.
    pub fn objects_dir(&self, entity: &str) -> Result<PathBuf> {
        validate_key("entity", entity)?;
        Ok(self.root.join(OBJECTS_DIR).join(entity))
    }

    fn object_path(&self, entity: &str, identifier: &str) -> Result<PathBuf> {
        validate_key("identifier", identifier)?;
        Ok(self
            .objects_dir(entity)?
            .join(format!("{identifier}{FILE_EXTENSION}")))
    }

    fn page_path(&self, entity: &str, index: u64) -> Result<PathBuf> {
        Ok(self
            .pages_dir(entity)?
            .join(format!("{index}{FILE_EXTENSION}")))
    }
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn has_object(&self, entity: &str, identifier: &str) -> Result<bool> {
        let path = self.object_path(entity, identifier)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))
    }

    #[instrument(level = "trace", skip(self, record), fields(entity = %record.entity, id = %record.identifier))]
    async fn put_object(&self, record: &ObjectRecord) -> Result<bool> {
        let path = self.object_path(&record.entity, &record.identifier)?;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CheckpointError::io(&path, e))?
        {
            trace!("object already stored");
            return Ok(false);
        }

        let bytes =
            serde_json::to_vec(&record.payload).map_err(|e| CheckpointError::serialize(&path, e))?;
        write_atomic(&path, &bytes).await?;
        Ok(true)
    }

    #[instrument(level = "debug", skip(self, page), fields(entity = %page.entity, index = page.index, items = page.items.len()))]
    async fn put_page(&self, page: &Page) -> Result<()> {
        let path = self.page_path(&page.entity, page.index)?;
        let body = json!({ "content": page.items });
        let bytes = serde_json::to_vec(&body).map_err(|e| CheckpointError::serialize(&path, e))?;
        write_atomic(&path, &bytes).await?;
        debug!(path = %path.display(), "page stored");
        Ok(())
    }

    async fn list_pages(&self, entity: &str) -> Result<PageScan> {
        let dir = self.pages_dir(entity)?;
        let mut indexed: Vec<(u64, PathBuf)> = list_json_stems(&dir)
            .await?
            .into_iter()
            .filter_map(|stem| {
                let index = stem.parse::<u64>().ok()?;
                Some((index, dir.join(format!("{stem}{FILE_EXTENSION}"))))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        let mut scan = PageScan::default();
        for (index, path) in indexed {
            match read_page_items(&path).await {
                Ok(items) => scan.pages.push(Page::new(entity, index, items)),
                Err(e) => {
                    warn!(entity, page = index, error = %e, "skipping unreadable page");
                    scan.skipped.push(index);
                }
            }
        }
        Ok(scan)
    }

    async fn list_object_ids(&self, entity: &str) -> Result<HashSet<String>> {
        let dir = self.objects_dir(entity)?;
        Ok(list_json_stems(&dir).await?.into_iter().collect())
    }
}

/// Reads the `content` array of one page file.
async fn read_page_items(path: &Path) -> Result<Vec<Value>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| CheckpointError::io(path, e))?;
    let doc: Value = serde_json::from_slice(&bytes)
        .map_err(|e| CheckpointError::corrupt_page(path, e.to_string()))?;
    doc.get("content")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| CheckpointError::corrupt_page(path, "missing content array"))
}

/// Rejects values that cannot safely be used as a single path component.
fn validate_key(kind: &'static str, value: &str) -> Result<()> {
    let unusable = value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\', '\0']);
    if unusable {
        return Err(CheckpointError::invalid_key(kind, value));
    }
    Ok(())
}

/// File stems of visible `*.json` files in `dir`; a missing directory is empty.
async fn list_json_stems(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CheckpointError::io(dir, e)),
    };

    let mut stems = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CheckpointError::io(dir, e))?
    {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Some(stem) = name.strip_suffix(FILE_EXTENSION) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| CheckpointError::invalid_key("identifier", path.display().to_string()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CheckpointError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| CheckpointError::io(&tmp, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        // Best-effort cleanup; the temp file is hidden from listings anyway.
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(CheckpointError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, FsCheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = FsCheckpointStore::new(dir.path());
        (dir, store)
    }

    // ==================== Object Tests ====================

    #[tokio::test]
    async fn test_put_object_writes_once() {
        let (dir, store) = store();
        let first = ObjectRecord::new("Plan", "0042", json!({"v": 1}));
        let second = ObjectRecord::new("Plan", "0042", json!({"v": 2}));

        assert!(store.put_object(&first).await.unwrap());
        assert!(!store.put_object(&second).await.unwrap());

        let path = dir.path().join("objects/Plan/0042.json");
        let stored: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(stored, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_has_object_and_list_ids_preserve_leading_zeros() {
        let (_dir, store) = store();
        assert!(!store.has_object("Lot", "007").await.unwrap());

        store
            .put_object(&ObjectRecord::new("Lot", "007", json!({})))
            .await
            .unwrap();
        store
            .put_object(&ObjectRecord::new("Lot", "8", json!({})))
            .await
            .unwrap();

        assert!(store.has_object("Lot", "007").await.unwrap());
        assert!(!store.has_object("Lot", "7").await.unwrap());
        let ids = store.list_object_ids("Lot").await.unwrap();
        assert_eq!(ids, HashSet::from(["007".to_string(), "8".to_string()]));
    }

    #[tokio::test]
    async fn test_list_ids_of_unknown_entity_is_empty() {
        let (_dir, store) = store();
        assert!(store.list_object_ids("Nothing").await.unwrap().is_empty());
        assert!(store.list_pages("Nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_ids_ignores_temp_and_foreign_files() {
        let (dir, store) = store();
        let objects = dir.path().join("objects/Plan");
        std::fs::create_dir_all(&objects).unwrap();
        std::fs::write(objects.join("1.json"), "{}").unwrap();
        std::fs::write(objects.join(".1.json.99.0.tmp"), "{").unwrap();
        std::fs::write(objects.join("notes.txt"), "x").unwrap();

        let ids = store.list_object_ids("Plan").await.unwrap();
        assert_eq!(ids, HashSet::from(["1".to_string()]));
    }

    #[tokio::test]
    async fn test_rejects_unusable_identifiers() {
        let (_dir, store) = store();
        for bad in ["", ".", "..", "a/b", "a\\b", ".hidden"] {
            let err = store
                .put_object(&ObjectRecord::new("Plan", bad, json!({})))
                .await
                .unwrap_err();
            assert!(
                matches!(err, CheckpointError::InvalidKey { kind: "identifier", .. }),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_unusable_entity() {
        let (_dir, store) = store();
        let err = store.list_pages("../up").await.unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidKey { kind: "entity", .. }));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let (dir, store) = store();
        store
            .put_object(&ObjectRecord::new("Plan", "1", json!({"a": 1})))
            .await
            .unwrap();
        let names: Vec<String> = std::fs::read_dir(dir.path().join("objects/Plan"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["1.json".to_string()]);
    }

    // ==================== Page Tests ====================

    #[tokio::test]
    async fn test_pages_listed_in_numeric_order() {
        let (_dir, store) = store();
        for index in [10, 2, 0] {
            store
                .put_page(&Page::new("Plan", index, vec![json!({"id": index})]))
                .await
                .unwrap();
        }

        let pages = store.list_pages("Plan").await.unwrap().pages;
        let indexes: Vec<u64> = pages.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![0, 2, 10]);
        assert_eq!(pages[2].items, vec![json!({"id": 10})]);
    }

    #[tokio::test]
    async fn test_put_page_overwrites_same_index() {
        let (_dir, store) = store();
        store
            .put_page(&Page::new("Plan", 0, vec![json!({"id": 1})]))
            .await
            .unwrap();
        store
            .put_page(&Page::new("Plan", 0, vec![json!({"id": 2})]))
            .await
            .unwrap();

        let pages = store.list_pages("Plan").await.unwrap().pages;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].items, vec![json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_page_file_uses_content_envelope() {
        let (dir, store) = store();
        store
            .put_page(&Page::new("OrderDetail", 3, vec![json!({"id": "A"})]))
            .await
            .unwrap();
        let raw = std::fs::read_to_string(dir.path().join("pages/OrderDetail/3.json")).unwrap();
        let doc: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc, json!({"content": [{"id": "A"}]}));
    }

    #[tokio::test]
    async fn test_unreadable_pages_are_skipped_and_reported() {
        let (dir, store) = store();
        store
            .put_page(&Page::new("Plan", 0, vec![json!({"id": 1})]))
            .await
            .unwrap();
        let pages = dir.path().join("pages/Plan");
        std::fs::write(pages.join("3.json"), "{\"other\": 1}").unwrap();
        std::fs::write(pages.join("7.json"), "{\"content\": [{\"id\"").unwrap();

        let scan = store.list_pages("Plan").await.unwrap();
        assert_eq!(scan.pages.len(), 1);
        assert_eq!(scan.pages[0].index, 0);
        assert_eq!(scan.skipped, vec![3, 7]);
    }

    #[tokio::test]
    async fn test_page_without_content_is_corrupt() {
        let (dir, _store) = store();
        let path = dir.path().join("0.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let err = read_page_items(&path).await.unwrap_err();
        assert!(matches!(err, CheckpointError::CorruptPage { .. }));
    }
}
