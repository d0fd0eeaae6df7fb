//! # Backup Records
//!
//! Pre-images captured before a document is mutated, stored in a per-migration
//! backup collection.
//!
//! # Design Principles
//!
//! 1. **Insert-if-absent**: the first captured pre-image of a document wins
//! 2. **Self-describing**: each record carries the operation applied after it was taken
//! 3. **Deterministic naming**: the backup collection is derived from the
//!    collection name and the migration id

use crate::document::{pick_sparse_paths, Document, ID_FIELD};
use crate::migrations::{MigrationError, MigrationResult};
use crate::update::{DocumentOperation, RecordedOperation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of every backup collection name
pub const BACKUP_COLLECTION_PREFIX: &str = "_rollback_";

/// Name of the backup collection of migration `id` over `collection`
pub fn backup_store_name(collection: &str, id: &str) -> String {
    format!("{}{}_{}", BACKUP_COLLECTION_PREFIX, collection, id)
}

/// One document of a backup collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Identifier of the source document
    #[serde(rename = "_id")]
    pub id: Value,

    /// The source document, or the configured subset of it
    pub backup: Document,

    /// Capture time
    pub date: DateTime<Utc>,

    /// Replay text of the operation applied after capture
    pub update_spec: String,
}

impl BackupRecord {
    /// Capture the pre-image of `source` before `operation` is applied
    ///
    /// With a projection only the listed dotted paths present in the source are
    /// kept; array elements picked by index are stored under their index.
    pub fn capture(
        source: &Document,
        projection: Option<&[String]>,
        operation: &DocumentOperation,
    ) -> MigrationResult<Self> {
        let id = source
            .get(ID_FIELD)
            .cloned()
            .ok_or(MigrationError::MissingDocumentId)?;

        let backup = match projection {
            Some(paths) => pick_sparse_paths(source, paths),
            None => source.clone(),
        };

        let update_spec = operation
            .replay_text()
            .map_err(|e| MigrationError::InvalidBackupRecord {
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            backup,
            date: Utc::now(),
            update_spec,
        })
    }

    /// Stored form of the record
    pub fn to_document(&self) -> MigrationResult<Document> {
        match serde_json::to_value(self) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(MigrationError::InvalidBackupRecord {
                reason: "record did not serialize to a document".to_string(),
            }),
            Err(e) => Err(MigrationError::InvalidBackupRecord {
                reason: e.to_string(),
            }),
        }
    }

    /// Read a record back from the backup collection
    pub fn from_document(document: Document) -> MigrationResult<Self> {
        serde_json::from_value(Value::Object(document)).map_err(|e| {
            MigrationError::InvalidBackupRecord {
                reason: e.to_string(),
            }
        })
    }

    /// Operation that was applied after this record was captured
    pub fn recorded_operation(&self) -> MigrationResult<RecordedOperation> {
        RecordedOperation::parse(&self.update_spec).map_err(|e| MigrationError::ReplayFormat {
            text: self.update_spec.clone(),
            reason: e.to_string(),
        })
    }
}
