//! # Bulk Data Migrations
//!
//! MANIFESTO ALIGNMENT: Resumable, self-reversible mutations over a collection.
//!
//! # Design Principles
//!
//! 1. **Backup before mutate**: a document's pre-image is written no later than
//!    its mutation, in the batch preceding it
//! 2. **Resumable**: a failed run is re-invoked from the query; backups are
//!    insert-if-absent so the first pre-image always wins
//! 3. **Self-reversible**: rollback derives the inverse of each recorded update
//!    without caller-written undo logic
//! 4. **Bounded**: batches are sequential and per-document callbacks run under
//!    a concurrency limit
//!
//! # Usage
//!
//! ```ignore
//! let migration = BulkDataMigration::builder("users", "add-active-flag")
//!     .filter(doc)
//!     .update(UpdateSpec::new().set("active", json!(true)))
//!     .build(store)?;
//!
//! migration.update().await?;
//! migration.rollback().await?;
//! ```

pub mod errors;
pub mod options;
pub mod rollback;
pub mod runner;

pub use errors::{MigrationError, MigrationResult};
pub use options::MigrationOptions;

use crate::backup::backup_store_name;
use crate::bulk::BulkOperationResult;
use crate::document::Document;
use crate::observability::{MigrationLogger, TracingLogger};
use crate::store::{DocumentStore, ValidationLevel};
use crate::update::{MigrationUpdate, RollbackFn};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;

/// Selection of the documents a migration applies to
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationQuery {
    /// Plain filter, combined with the projection on the read
    Filter(Document),
    /// Aggregation pipeline; the projection is appended as a final stage
    Pipeline(Vec<Document>),
}

impl Default for MigrationQuery {
    fn default() -> Self {
        MigrationQuery::Filter(Document::new())
    }
}

/// Identity of a migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationInfo {
    pub id: String,
    pub collection_name: String,
    pub backup_collection_name: String,
}

/// A resumable, reversible bulk migration over one collection
pub struct BulkDataMigration {
    store: Arc<dyn DocumentStore>,
    id: String,
    collection_name: String,
    backup_collection_name: String,
    query: MigrationQuery,
    projection: Document,
    update: MigrationUpdate,
    rollback_fn: Option<RollbackFn>,
    options: MigrationOptions,
    logger: Arc<dyn MigrationLogger>,
}

impl BulkDataMigration {
    /// Start configuring migration `id` over `collection`
    pub fn builder(collection: impl Into<String>, id: impl Into<String>) -> BulkDataMigrationBuilder {
        BulkDataMigrationBuilder {
            collection_name: collection.into(),
            id: id.into(),
            query: MigrationQuery::default(),
            projection: Document::new(),
            update: None,
            rollback_fn: None,
            options: MigrationOptions::default(),
            logger: None,
        }
    }

    pub fn info(&self) -> MigrationInfo {
        MigrationInfo {
            id: self.id.clone(),
            collection_name: self.collection_name.clone(),
            backup_collection_name: self.backup_collection_name.clone(),
        }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    /// Replace the logger used by subsequent calls
    pub fn set_logger(&mut self, logger: Arc<dyn MigrationLogger>) {
        self.logger = logger;
    }

    /// Drop the backup collection; a missing one is not an error
    pub async fn clean(&self) -> MigrationResult<()> {
        self.logger.info(
            &json!({ "migrationCollectionName": self.backup_collection_name }),
            "Deleting migration rollback collection",
        );

        match self.store.drop_collection(&self.backup_collection_name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_collection_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Rename a collection, reporting failure as a status instead of an error
    async fn rename_collection(&self, from: &str, to: &str) -> BulkOperationResult {
        match self.store.rename_collection(from, to).await {
            Ok(()) => BulkOperationResult::status(true),
            Err(err) => {
                self.logger
                    .warn(&json!({ "error": err.to_string() }), "Couldn't rename collection");
                BulkOperationResult::status(false)
            }
        }
    }

    /// Run `phase` with validation of the live collection switched off when `bypass` is set
    ///
    /// The level is set back to moderate afterwards, whatever the outcome. A
    /// failed restoration after a failed phase is logged; the phase error wins.
    async fn with_validation_bypass<T, F>(&self, bypass: bool, phase: F) -> MigrationResult<T>
    where
        F: std::future::Future<Output = MigrationResult<T>>,
    {
        if !bypass {
            return phase.await;
        }

        self.store
            .set_validation_level(&self.collection_name, ValidationLevel::Off)
            .await?;

        let outcome = phase.await;
        let restored = self
            .store
            .set_validation_level(&self.collection_name, ValidationLevel::Moderate)
            .await;

        match (outcome, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(restore_err)) => {
                self.logger.warn(
                    &json!({ "collectionName": self.collection_name, "error": restore_err.to_string() }),
                    "Couldn't restore validation level",
                );
                Err(err)
            }
        }
    }
}

impl fmt::Debug for BulkDataMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkDataMigration")
            .field("id", &self.id)
            .field("collection_name", &self.collection_name)
            .field("query", &self.query)
            .field("update", &self.update)
            .field("options", &self.options)
            .finish()
    }
}

/// Builder for [`BulkDataMigration`]
pub struct BulkDataMigrationBuilder {
    collection_name: String,
    id: String,
    query: MigrationQuery,
    projection: Document,
    update: Option<MigrationUpdate>,
    rollback_fn: Option<RollbackFn>,
    options: MigrationOptions,
    logger: Option<Arc<dyn MigrationLogger>>,
}

impl BulkDataMigrationBuilder {
    pub fn query(mut self, query: MigrationQuery) -> Self {
        self.query = query;
        self
    }

    /// Select documents with a plain filter
    pub fn filter(self, filter: Document) -> Self {
        self.query(MigrationQuery::Filter(filter))
    }

    /// Select documents with an aggregation pipeline
    pub fn pipeline(self, stages: Vec<Document>) -> Self {
        self.query(MigrationQuery::Pipeline(stages))
    }

    /// Fields read from each matched document
    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = projection;
        self
    }

    pub fn update(mut self, update: impl Into<MigrationUpdate>) -> Self {
        self.update = Some(update.into());
        self
    }

    /// Custom inverse used instead of the computed one
    pub fn rollback_fn(mut self, rollback_fn: RollbackFn) -> Self {
        self.rollback_fn = Some(rollback_fn);
        self
    }

    pub fn options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn MigrationLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Validate the configuration and bind it to `store`
    pub fn build(self, store: Arc<dyn DocumentStore>) -> MigrationResult<BulkDataMigration> {
        let update = self.update.ok_or_else(|| MigrationError::InvalidOptions {
            field: "update",
            reason: "an update is required".to_string(),
        })?;

        if self.id.is_empty() {
            return Err(MigrationError::InvalidOptions {
                field: "id",
                reason: "must not be empty".to_string(),
            });
        }

        self.options.validate()?;

        Ok(BulkDataMigration {
            store,
            backup_collection_name: backup_store_name(&self.collection_name, &self.id),
            id: self.id,
            collection_name: self.collection_name,
            query: self.query,
            projection: self.projection,
            update,
            rollback_fn: self.rollback_fn,
            options: self.options,
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
        })
    }
}
