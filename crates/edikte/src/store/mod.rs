mod memory;
mod notion;

pub use memory::MemoryStore;
pub use notion::{NotionStore, clean_notion_db_id};

use async_trait::async_trait;

use crate::record::{ExistingRecord, FieldMap, RecordField};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Store returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a database id: {0}")]
    InvalidDatabaseId(String),
    #[error("Unknown record: {0}")]
    UnknownRecord(String),
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Where reconciled records live. Records are plain field maps keyed by an
/// opaque id; adapters translate fields to their own schema.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_records(&self) -> Result<Vec<ExistingRecord>, StoreError>;

    /// Creates a record and returns its id.
    async fn create_record(&self, fields: &FieldMap) -> Result<String, StoreError>;

    /// Overwrites only the given fields.
    async fn update_record(&self, id: &str, changes: &FieldMap) -> Result<(), StoreError>;

    /// Whether records in this store can hold `field`.
    fn keeps(&self, _field: RecordField) -> bool {
        true
    }
}
