use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{RecordStore, StoreError};
use crate::record::{ExistingRecord, FieldMap};

/// Records held in memory, optionally persisted to a JSON snapshot after
/// every write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<ExistingRecord>>,
    snapshot: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ExistingRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            snapshot: None,
        }
    }

    /// Opens a snapshot file. A missing file starts an empty store that will
    /// be written on the first change.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let records = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            log::info!("No snapshot at {}, starting empty", path.display());
            Vec::new()
        };
        Ok(Self {
            records: Mutex::new(records),
            snapshot: Some(path.to_path_buf()),
        })
    }

    pub fn records(&self) -> Vec<ExistingRecord> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ExistingRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, records: &[ExistingRecord]) -> Result<(), StoreError> {
        if let Some(path) = &self.snapshot {
            fs::write(path, serde_json::to_string_pretty(records)?)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_records(&self) -> Result<Vec<ExistingRecord>, StoreError> {
        Ok(self.records())
    }

    /// The record is only kept once the snapshot write succeeded.
    async fn create_record(&self, fields: &FieldMap) -> Result<String, StoreError> {
        let mut records = self.lock();
        let mut n = records.len() + 1;
        while records.iter().any(|r| r.id == format!("rec-{n}")) {
            n += 1;
        }
        let id = format!("rec-{n}");
        records.push(ExistingRecord::new(id.clone(), fields.clone()));
        if let Err(e) = self.persist(&records) {
            records.pop();
            return Err(e);
        }
        Ok(id)
    }

    async fn update_record(&self, id: &str, changes: &FieldMap) -> Result<(), StoreError> {
        let mut records = self.lock();
        let idx = records
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::UnknownRecord(id.to_string()))?;
        let previous = records[idx].clone();
        records[idx].apply(changes);
        if let Err(e) = self.persist(&records) {
            records[idx] = previous;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, RecordField};

    fn fields(address: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(RecordField::Address, FieldValue::Text(address.to_string()));
        fields
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let store = MemoryStore::new();
        let id = store.create_record(&fields("Hauptstraße 1")).await.unwrap();

        let mut changes = FieldMap::new();
        changes.insert(RecordField::Area, FieldValue::Number(78.5));
        store.update_record(&id, &changes).await.unwrap();

        let records = store.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text(RecordField::Address), Some("Hauptstraße 1"));
        assert_eq!(
            records[0].fields.get(&RecordField::Area),
            Some(&FieldValue::Number(78.5))
        );
    }

    #[tokio::test]
    async fn test_update_unknown_record_fails() {
        let store = MemoryStore::new();
        let result = store.update_record("nope", &FieldMap::new()).await;
        assert!(matches!(result, Err(StoreError::UnknownRecord(_))));
    }

    #[tokio::test]
    async fn test_ids_stay_unique() {
        let store = MemoryStore::with_records(vec![ExistingRecord::new("rec-2", fields("A"))]);
        let a = store.create_record(&fields("B")).await.unwrap();
        let b = store.create_record(&fields("C")).await.unwrap();
        assert_ne!(a, "rec-2");
        assert_ne!(b, "rec-2");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_failed_snapshot_write_keeps_nothing() {
        let path = std::env::temp_dir()
            .join(format!("edikte-missing-{}", std::process::id()))
            .join("records.json");
        let store = MemoryStore::open(&path).unwrap();

        let created = store.create_record(&fields("Hauptstraße 1")).await;
        assert!(matches!(created, Err(StoreError::Io(_))));
        assert!(store.records().is_empty());

        let store = MemoryStore {
            records: Mutex::new(vec![ExistingRecord::new("rec-1", fields("A"))]),
            snapshot: Some(path),
        };
        let updated = store.update_record("rec-1", &fields("B")).await;
        assert!(matches!(updated, Err(StoreError::Io(_))));
        assert_eq!(store.records()[0].text(RecordField::Address), Some("A"));
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "edikte-snapshot-{}-{}.json",
            std::process::id(),
            line!()
        ));
        let _ = fs::remove_file(&path);

        let store = MemoryStore::open(&path).unwrap();
        store.create_record(&fields("Hauptstraße 1")).await.unwrap();

        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.records(), store.records());

        let _ = fs::remove_file(&path);
    }
}
