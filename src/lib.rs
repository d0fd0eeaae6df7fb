//! bulk-data-migration - Resumable, self-reversible bulk mutations over a document store
//!
//! A migration streams the documents selected by a filter or pipeline, backs up
//! each pre-image, applies the mutation in batches, and can later replay the
//! computed inverse of every recorded update.

pub mod backup;
pub mod bulk;
pub mod document;
pub mod migrations;
pub mod observability;
pub mod store;
pub mod update;

pub use backup::{backup_store_name, BackupRecord};
pub use bulk::{BulkOperationResult, Progress, TotalEntries};
pub use document::Document;
pub use migrations::{
    BulkDataMigration, BulkDataMigrationBuilder, MigrationError, MigrationInfo, MigrationOptions,
    MigrationQuery, MigrationResult,
};
pub use observability::{MigrationLogger, NoopLogger, RecordingLogger, TracingLogger};
pub use store::{DocumentStore, InMemoryStore, StoreError, ValidationLevel};
pub use update::{
    compute_rollback_spec, rollback_fn, DocumentOperation, MigrationUpdate, RollbackFn,
    RollbackSpec, UpdateSpec,
};
