use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{ClipError, Result};
use super::HistoryPersistence;
use super::models::Item;
use super::schema::StoredItem;

pub struct JsonStorage {
    path: PathBuf,
}

impl JsonStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Records stay untyped here so one malformed entry cannot sink the rest.
    fn read_document(&self) -> Result<Option<Vec<serde_json::Value>>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

impl HistoryPersistence for JsonStorage {
    fn load(&self) -> Vec<Item> {
        let records = match self.read_document() {
            Ok(Some(records)) => records,
            Ok(None) => {
                debug!(path = %self.path.display(), "no saved history");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable history");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let parsed = serde_json::from_value::<StoredItem>(record)
                .map_err(ClipError::from)
                .and_then(Item::try_from);
            match parsed {
                Ok(item) if seen.insert(item.id) => items.push(item),
                Ok(item) => warn!(id = %item.id, "skipping duplicate history record"),
                Err(e) => warn!(error = %e, "skipping invalid history record"),
            }
        }
        items
    }

    fn save(&self, items: &[Item]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let records: Vec<StoredItem> = items.iter().map(StoredItem::from).collect();
        let json = serde_json::to_vec_pretty(&records)?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage_in(dir: &TempDir) -> JsonStorage {
        JsonStorage::new(dir.path().join("nested/history.json"))
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(storage_in(&dir).load().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order_and_fields() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);

        let mut pinned = Item::text("pinned");
        pinned.is_pinned = true;
        let items = vec![pinned, Item::text("second"), Item::image(vec![9, 8, 7])];
        storage.save(&items).unwrap();

        let loaded = storage.load();
        assert_eq!(loaded, items);
        assert!(!dir.path().join("nested/history.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_empty_history() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        fs::create_dir_all(storage.path().parent().unwrap()).unwrap();
        fs::write(storage.path(), b"{ not json").unwrap();
        assert!(storage.load().is_empty());
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        let good = Item::text("good");
        let good_json = serde_json::to_value(StoredItem::from(&good)).unwrap();
        let doc = serde_json::json!([
            good_json,
            {"id": crate::storage::models::ItemId::generate(), "type": "text",
             "timestamp": "2024-01-01T00:00:00Z", "isPinned": false},
            {"id": "not-a-uuid", "type": "text", "textContent": "x",
             "timestamp": "2024-01-01T00:00:00Z"},
            {"id": crate::storage::models::ItemId::generate(), "type": "text",
             "textContent": "bad time", "timestamp": "yesterday"},
            good_json,
        ]);
        fs::create_dir_all(storage.path().parent().unwrap()).unwrap();
        fs::write(storage.path(), serde_json::to_vec(&doc).unwrap()).unwrap();

        let loaded = storage.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);
    }

    #[test]
    fn test_save_overwrites_previous_document() {
        let dir = TempDir::new().unwrap();
        let storage = storage_in(&dir);
        storage.save(&[Item::text("a"), Item::text("b")]).unwrap();
        storage.save(&[Item::text("c")]).unwrap();
        let loaded = storage.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text_content(), Some("c"));
    }
}
