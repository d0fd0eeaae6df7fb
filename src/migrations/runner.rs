//! # Migration Runner
//!
//! MANIFESTO ALIGNMENT: Deterministic, batch-by-batch migration execution.
//!
//! This module orchestrates `update()` with:
//! - Streaming reads split into batches of `maxBulkSize`
//! - Per-document evaluation under a concurrency limit
//! - Backups flushed before the mutations of the same batch
//! - An idempotency check after every batch

use super::errors::{MigrationError, MigrationResult};
use super::{BulkDataMigration, MigrationQuery};
use crate::backup::BackupRecord;
use crate::bulk::{BackupAccumulator, BulkOperationResult, MigrationAccumulator, TotalEntries};
use crate::document::{Document, ID_FIELD};
use crate::store::DocumentStream;
use crate::update::{DocumentOperation, MigrationUpdate};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::time::Duration;

/// Logged when a batch created fewer backups than it mutated documents
pub const IDEMPOTENCY_WARNING: &str = "The number of backup documents should be equal to the total updated documents. Check your query is idempotent or ensure you don't use a same migration id for different migrations.";

/// Logged when the up-front count exceeds its threshold
pub const SLOW_COUNT_WARNING: &str =
    "Count is taking a significant amount of time, consider using dontCount:true option";

impl BulkDataMigration {
    /// Apply the migration to every selected document
    ///
    /// Returns the cumulative result of the mutations. A failure leaves the
    /// batches flushed so far in place; calling `update()` again resumes.
    pub async fn update(&self) -> MigrationResult<BulkOperationResult> {
        if matches!(self.update, MigrationUpdate::DeleteCollection) {
            return Ok(self
                .rename_collection(&self.collection_name, &self.backup_collection_name)
                .await);
        }

        self.with_validation_bypass(self.options.bypass_update_validation, self.run_update())
            .await
    }

    async fn run_update(&self) -> MigrationResult<BulkOperationResult> {
        let cursor = self.open_cursor().await?;
        let total = self.count_entries().await?;

        let total_payload = match total {
            TotalEntries::Counted(count) => json!(count),
            TotalEntries::Unknown => json!("N/A (dontCount option ON)"),
        };
        self.logger.info(
            &json!({
                "collectionName": self.collection_name,
                "id": self.id,
                "totalEntries": total_payload,
            }),
            "Starting migration UPDATE process",
        );

        let mut migration =
            MigrationAccumulator::new(self.store.clone(), &self.collection_name, self.logger.clone(), total)
                .with_collected_ids(self.options.collect_ids);
        let mut backups = BackupAccumulator::new(
            self.store.clone(),
            &self.backup_collection_name,
            self.logger.clone(),
            total,
        )
        .with_collected_ids(self.options.collect_ids);

        let mut batches = cursor.chunks(self.options.max_bulk_size);
        while let Some(batch) = batches.next().await {
            let documents = batch.into_iter().collect::<Result<Vec<_>, _>>()?;
            let evaluated: Vec<(Document, DocumentOperation)> = stream::iter(
                documents.into_iter().map(|document| self.evaluate(document)),
            )
            .buffer_unordered(self.options.max_concurrent_update_calls)
            .try_collect()
            .await?;

            for (document, operation) in &evaluated {
                let id = document.get(ID_FIELD).ok_or(MigrationError::MissingDocumentId)?;
                if self.options.rollbackable {
                    let record = BackupRecord::capture(
                        document,
                        self.options.projection_backup_filter.as_deref(),
                        operation,
                    )?;
                    backups.add_backup(&record)?;
                }
                migration.add_operation(id, operation);
            }

            let backed_up = backups.execute(false).await?;
            let mutated = migration
                .execute(self.options.continue_on_bulk_write_error)
                .await?;

            if self.options.rollbackable {
                self.check_idempotency(&backed_up, &mutated);
            }

            self.throttle().await;
        }

        self.logger.info(
            &json!({ "collectionName": self.collection_name, "id": self.id }),
            "Ending migration UPDATE process",
        );

        Ok(migration.into_results())
    }

    async fn open_cursor(&self) -> MigrationResult<DocumentStream> {
        let cursor = match &self.query {
            MigrationQuery::Filter(filter) => {
                let projection = (!self.projection.is_empty()).then_some(&self.projection);
                self.store
                    .find(&self.collection_name, filter, projection)
                    .await?
            }
            MigrationQuery::Pipeline(stages) => {
                let mut stages = stages.clone();
                if !self.projection.is_empty() {
                    let mut project = Document::new();
                    project.insert("$project".to_string(), Value::Object(self.projection.clone()));
                    stages.push(project);
                }
                self.store.aggregate(&self.collection_name, &stages).await?
            }
        };
        Ok(cursor)
    }

    /// Count the selected documents, warning once if counting is slow
    async fn count_entries(&self) -> MigrationResult<TotalEntries> {
        if self.options.dont_count {
            return Ok(TotalEntries::Unknown);
        }

        let count = async {
            match &self.query {
                MigrationQuery::Filter(filter) => {
                    self.store.count_documents(&self.collection_name, filter).await
                }
                MigrationQuery::Pipeline(stages) => {
                    self.store.count_pipeline(&self.collection_name, stages).await
                }
            }
        };
        tokio::pin!(count);

        let threshold = Duration::from_millis(self.options.count_warning_threshold_ms);
        let total = match tokio::time::timeout(threshold, &mut count).await {
            Ok(total) => total?,
            Err(_) => {
                self.logger.warn(
                    &json!({ "thresholdMs": self.options.count_warning_threshold_ms }),
                    SLOW_COUNT_WARNING,
                );
                count.await?
            }
        };
        Ok(TotalEntries::Counted(total))
    }

    async fn evaluate(&self, document: Document) -> MigrationResult<(Document, DocumentOperation)> {
        let operation = self
            .update
            .evaluate(document.clone())
            .await
            .map_err(|e| MigrationError::Transform {
                reason: e.to_string(),
            })?;
        Ok((document, operation))
    }

    fn check_idempotency(&self, backed_up: &BulkOperationResult, mutated: &BulkOperationResult) {
        let total_new_backup_docs = backed_up.n_upserted + backed_up.n_inserted;
        let total_updated_document = mutated.n_modified + mutated.n_removed;
        if total_new_backup_docs < total_updated_document {
            self.logger.warn(
                &json!({
                    "totalNewBackupDocs": total_new_backup_docs,
                    "totalUpdatedDocument": total_updated_document,
                }),
                IDEMPOTENCY_WARNING,
            );
        }
    }

    async fn throttle(&self) {
        if self.options.throttle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.options.throttle_ms)).await;
        }
    }
}
