//! # Bulk Operation Accumulators
//!
//! Buffers write operations for one collection and submits them as unordered
//! batches, keeping a cumulative result across flushes.
//!
//! # Design Principles
//!
//! 1. **One accumulator per target**: backups, mutations and restorations never share a batch
//! 2. **Cumulative results**: every flush is merged into a running [`BulkOperationResult`]
//! 3. **Explicit partial failures**: a partially failed batch propagates unless the
//!    caller asked to continue, in which case its errors are kept in the result
//! 4. **Observable**: each flush logs its own counts plus overall progress

pub mod backup;
pub mod migration;
pub mod rollback;

pub use backup::{Backup, BackupAccumulator};
pub use migration::{Migration, MigrationAccumulator};
pub use rollback::{Rollback, RollbackAccumulator};

use crate::migrations::MigrationResult;
use crate::observability::MigrationLogger;
use crate::store::{BulkWriteResult, DocumentStore, StoreError, WriteError, WriteModel};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Rendering used wherever a total or percentage is unknown
pub const UNKNOWN_MARKER: &str = "N/A";

/// Counts and errors of one or more bulk writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResult {
    pub inserted_ids: Vec<Value>,
    pub n_inserted: u64,
    pub n_matched: u64,
    pub n_modified: u64,
    pub n_removed: u64,
    pub n_upserted: u64,
    pub ok: bool,
    pub upserted: Vec<Value>,
    pub write_concern_errors: Vec<Value>,
    pub write_errors: Vec<WriteError>,
}

impl Default for BulkOperationResult {
    fn default() -> Self {
        Self {
            inserted_ids: Vec::new(),
            n_inserted: 0,
            n_matched: 0,
            n_modified: 0,
            n_removed: 0,
            n_upserted: 0,
            ok: true,
            upserted: Vec::new(),
            write_concern_errors: Vec::new(),
            write_errors: Vec::new(),
        }
    }
}

impl BulkOperationResult {
    /// A result carrying only a status (used for collection renames)
    pub fn status(ok: bool) -> Self {
        Self {
            ok,
            ..Self::default()
        }
    }

    /// Convert a store acknowledgement; ids are kept only when `collect_ids` is set
    pub fn from_write_result(result: BulkWriteResult, collect_ids: bool) -> Self {
        Self {
            inserted_ids: if collect_ids { result.inserted_ids } else { Vec::new() },
            n_inserted: result.inserted_count,
            n_matched: result.matched_count,
            n_modified: result.modified_count,
            n_removed: result.deleted_count,
            n_upserted: result.upserted_count,
            ok: true,
            upserted: if collect_ids { result.upserted_ids } else { Vec::new() },
            write_concern_errors: result.write_concern_errors,
            write_errors: result.write_errors,
        }
    }

    /// Fold one batch into this cumulative result
    ///
    /// A failed operation was attempted against a matched document, so each
    /// write error also counts as matched.
    pub fn merge(&mut self, batch: &BulkOperationResult) {
        self.n_inserted += batch.n_inserted;
        self.n_matched += batch.n_matched + batch.write_errors.len() as u64;
        self.n_modified += batch.n_modified;
        self.n_removed += batch.n_removed;
        self.n_upserted += batch.n_upserted;
        self.ok = self.ok && batch.ok;
        self.inserted_ids.extend(batch.inserted_ids.iter().cloned());
        self.upserted.extend(batch.upserted.iter().cloned());
        self.write_concern_errors
            .extend(batch.write_concern_errors.iter().cloned());
        self.write_errors.extend(batch.write_errors.iter().cloned());
    }

    /// Operations done so far, as used for progress
    pub fn total_operations_done(&self) -> u64 {
        self.n_matched + self.n_upserted + self.n_inserted
    }
}

/// Number of operations an accumulator expects to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalEntries {
    Counted(u64),
    /// Counting was skipped
    Unknown,
}

impl TotalEntries {
    /// Payload value for logs
    pub fn to_log_value(&self) -> Value {
        match self {
            TotalEntries::Counted(total) => json!(total),
            TotalEntries::Unknown => json!(UNKNOWN_MARKER),
        }
    }
}

/// Completion percentage of an accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Percent(f64),
    Unknown,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Percent(percent) => write!(f, "{:.2}", percent),
            Progress::Unknown => f.write_str(UNKNOWN_MARKER),
        }
    }
}

/// What distinguishes one accumulator from another
pub trait BulkKind: Send + Sync {
    /// Message logged after each successful flush
    const FLUSH_MESSAGE: &'static str;
}

/// Generic batch accumulator; see [`BackupAccumulator`], [`MigrationAccumulator`]
/// and [`RollbackAccumulator`]
pub struct BulkAccumulator<K: BulkKind> {
    store: Arc<dyn DocumentStore>,
    collection: String,
    logger: Arc<dyn MigrationLogger>,
    total: TotalEntries,
    collect_ids: bool,
    pending: Vec<WriteModel>,
    results: BulkOperationResult,
    kind: PhantomData<K>,
}

impl<K: BulkKind> BulkAccumulator<K> {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        logger: Arc<dyn MigrationLogger>,
        total: TotalEntries,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            logger,
            total,
            collect_ids: false,
            pending: Vec::new(),
            results: BulkOperationResult::default(),
            kind: PhantomData,
        }
    }

    /// Keep inserted and upserted ids in the results
    pub fn with_collected_ids(mut self, collect_ids: bool) -> Self {
        self.collect_ids = collect_ids;
        self
    }

    /// Collection this accumulator writes to
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Number of queued operations
    pub fn size(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn push(&mut self, operation: WriteModel) {
        self.pending.push(operation);
    }

    /// Cumulative result of every flush so far
    pub fn results(&self) -> &BulkOperationResult {
        &self.results
    }

    pub fn into_results(self) -> BulkOperationResult {
        self.results
    }

    pub fn progress(&self) -> Progress {
        match self.total {
            TotalEntries::Unknown => Progress::Unknown,
            TotalEntries::Counted(0) => Progress::Percent(100.0),
            TotalEntries::Counted(total) => {
                Progress::Percent(self.results.total_operations_done() as f64 / total as f64 * 100.0)
            }
        }
    }

    /// Submit the queued operations as one unordered batch
    ///
    /// Returns the result of this batch alone; an empty queue submits nothing.
    /// A partial write failure is merged and swallowed when
    /// `continue_on_error` is set, otherwise it propagates.
    pub async fn execute(&mut self, continue_on_error: bool) -> MigrationResult<BulkOperationResult> {
        if self.pending.is_empty() {
            return Ok(BulkOperationResult::default());
        }

        let operations = std::mem::take(&mut self.pending);
        let batch = match self.store.bulk_write(&self.collection, operations).await {
            Ok(result) => BulkOperationResult::from_write_result(result, self.collect_ids),
            Err(StoreError::BulkWrite { result }) if continue_on_error => {
                BulkOperationResult::from_write_result(result, self.collect_ids)
            }
            Err(err) => return Err(err.into()),
        };

        self.results.merge(&batch);
        self.logger.info(&self.log_object(&batch), K::FLUSH_MESSAGE);
        Ok(batch)
    }

    /// Log payload for a batch: its non-empty fields plus overall progress
    pub fn log_object(&self, batch: &BulkOperationResult) -> Value {
        let mut payload = Map::new();
        if let Ok(Value::Object(fields)) = serde_json::to_value(batch) {
            for (key, value) in fields {
                if key == "insertedIds" || key == "upserted" {
                    continue;
                }
                let keep = match &value {
                    Value::Number(n) => n.as_f64().map(|n| n > 0.0).unwrap_or(false),
                    Value::Bool(flag) => *flag,
                    Value::Array(items) => !items.is_empty(),
                    Value::Object(entries) => !entries.is_empty(),
                    Value::String(text) => !text.is_empty(),
                    Value::Null => false,
                };
                if keep {
                    payload.insert(key, value);
                }
            }
        }

        payload.insert(
            "progress".to_string(),
            json!({
                "totalOperationsDone": self.results.total_operations_done(),
                "estimatedTotalOperations": self.total.to_log_value(),
                "percent": self.progress().to_string(),
            }),
        );
        Value::Object(payload)
    }
}
