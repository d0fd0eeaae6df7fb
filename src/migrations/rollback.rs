//! # Migration Rollback
//!
//! Replays the backup collection of a migration against the live collection,
//! then drops the backups.

use super::errors::{MigrationError, MigrationResult};
use super::BulkDataMigration;
use crate::backup::BackupRecord;
use crate::bulk::{BulkOperationResult, RollbackAccumulator, TotalEntries};
use crate::document::Document;
use crate::update::{compute_rollback_spec, MigrationUpdate, RecordedOperation, RollbackSpec};
use futures_util::StreamExt;
use serde_json::json;

/// Logged when rolling back a migration that captured no backups
pub const NOT_ROLLBACKABLE_WARNING: &str = "Calling rollback() on a non rollbackable script";

impl BulkDataMigration {
    /// Restore every backed-up document, then drop the backup collection
    ///
    /// Rolling back twice is harmless: the second call finds no backups.
    pub async fn rollback(&self) -> MigrationResult<BulkOperationResult> {
        if !self.options.rollbackable {
            self.logger.warn(
                &json!({ "collectionName": self.collection_name, "id": self.id }),
                NOT_ROLLBACKABLE_WARNING,
            );
            return Ok(BulkOperationResult::status(true));
        }

        if matches!(self.update, MigrationUpdate::DeleteCollection) {
            return Ok(self
                .rename_collection(&self.backup_collection_name, &self.collection_name)
                .await);
        }

        let total = self
            .store
            .count_documents(&self.backup_collection_name, &Document::new())
            .await?;
        self.logger.info(
            &json!({
                "collectionName": self.collection_name,
                "id": self.id,
                "totalEntries": total,
            }),
            "Starting migration ROLLBACK process",
        );

        self.with_validation_bypass(
            self.options.bypass_rollback_validation,
            self.run_rollback(TotalEntries::Counted(total)),
        )
        .await
    }

    async fn run_rollback(&self, total: TotalEntries) -> MigrationResult<BulkOperationResult> {
        let mut restorations =
            RollbackAccumulator::new(self.store.clone(), &self.collection_name, self.logger.clone(), total)
                .with_collected_ids(self.options.collect_ids);

        let mut cursor = self
            .store
            .find(&self.backup_collection_name, &Document::new(), None)
            .await?;
        while let Some(stored) = cursor.next().await {
            let record = BackupRecord::from_document(stored?)?;
            self.enqueue_restoration(&mut restorations, &record).await?;

            if restorations.size() >= self.options.max_bulk_size {
                restorations.execute(false).await?;
            }
        }
        restorations.execute(false).await?;

        self.logger.info(
            &json!({ "collectionName": self.collection_name, "id": self.id }),
            "Ending migration ROLLBACK process",
        );
        self.clean().await?;

        Ok(restorations.into_results())
    }

    async fn enqueue_restoration(
        &self,
        restorations: &mut RollbackAccumulator,
        record: &BackupRecord,
    ) -> MigrationResult<()> {
        let recorded = record.recorded_operation()?;

        let spec = match (recorded, &self.rollback_fn) {
            (RecordedOperation::Delete, _) => {
                restorations.add_reinsert(&record.id, &record.backup);
                return Ok(());
            }
            (_, Some(rollback_fn)) => {
                rollback_fn(record.backup.clone())
                    .await
                    .map_err(|e| MigrationError::Transform {
                        reason: e.to_string(),
                    })?
            }
            (RecordedOperation::FullOverwrite, None) => RollbackSpec {
                set: record.backup.clone(),
                ..RollbackSpec::default()
            },
            (RecordedOperation::Update(spec), None) => compute_rollback_spec(&spec, &record.backup),
        };

        if !spec.is_empty() {
            restorations.add_restore(&record.id, &spec, self.options.upsert_on_rollback);
        }
        Ok(())
    }
}
