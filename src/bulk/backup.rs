//! Backup accumulator: insert-if-absent writes into the backup collection

use super::{BulkAccumulator, BulkKind};
use crate::backup::BackupRecord;
use crate::document::{Document, ID_FIELD};
use crate::migrations::MigrationResult;
use crate::store::WriteModel;
use serde_json::Value;

/// Marker for [`BackupAccumulator`]
pub struct Backup;

impl BulkKind for Backup {
    const FLUSH_MESSAGE: &'static str = "Documents backup is successful";
}

/// Accumulates backup records
pub type BackupAccumulator = BulkAccumulator<Backup>;

impl BulkAccumulator<Backup> {
    /// Queue a record; an existing backup with the same id is left untouched
    pub fn add_backup(&mut self, record: &BackupRecord) -> MigrationResult<()> {
        let mut filter = Document::new();
        filter.insert(ID_FIELD.to_string(), record.id.clone());

        let mut update = Document::new();
        update.insert("$setOnInsert".to_string(), Value::Object(record.to_document()?));

        self.push(WriteModel::UpdateOne {
            filter,
            update,
            array_filters: Vec::new(),
            upsert: true,
        });
        Ok(())
    }
}
