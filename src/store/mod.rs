//! # Document Store Boundary
//!
//! The driver interface bulk migrations run against.
//!
//! # Design Principles
//!
//! 1. **Narrow**: only what migrations need (streaming reads, unordered bulk
//!    writes, collection rename/drop, validation level)
//! 2. **Streaming**: reads return a cursor-like stream, never a materialized result set
//! 3. **Unordered batches**: a failed operation does not stop the rest of its batch
//!
//! [`memory::InMemoryStore`] is a complete implementation used for tests and dry runs.

pub mod apply;
pub mod errors;
pub mod filter;
pub mod memory;

pub use errors::{StoreError, StoreResult};
pub use memory::InMemoryStore;

use crate::document::Document;
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Stream of documents returned by reads
pub type DocumentStream = BoxStream<'static, StoreResult<Document>>;

/// Field the pipeline count stage writes its result to
pub const COUNT_FIELD: &str = "totalEntries";

/// Collection validation strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Every insert and update is validated
    Strict,
    /// Inserts and updates of already-valid documents are validated
    Moderate,
    /// Nothing is validated
    Off,
}

/// One operation of an unordered bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        array_filters: Vec<Value>,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
}

/// Failure of a single operation inside a bulk write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteError {
    /// Position of the failed operation in the submitted batch
    pub index: usize,
    pub code: i32,
    pub message: String,
}

/// Outcome of a bulk write
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
    pub upserted_count: u64,
    pub inserted_ids: Vec<Value>,
    pub upserted_ids: Vec<Value>,
    pub write_errors: Vec<WriteError>,
    pub write_concern_errors: Vec<Value>,
}

/// Document store driver interface
///
/// MANIFESTO ALIGNMENT: Explicit interface for every store interaction.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stream documents matching `filter`, optionally projected
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> StoreResult<DocumentStream>;

    /// Stream the output of an aggregation pipeline
    async fn aggregate(&self, collection: &str, pipeline: &[Document])
        -> StoreResult<DocumentStream>;

    /// Count documents matching `filter`
    async fn count_documents(&self, collection: &str, filter: &Document) -> StoreResult<u64>;

    /// Count the output of an aggregation pipeline
    ///
    /// Appends a `$count` stage; a pipeline producing nothing counts as zero.
    async fn count_pipeline(&self, collection: &str, pipeline: &[Document]) -> StoreResult<u64> {
        let mut stages = pipeline.to_vec();
        let mut count_stage = Document::new();
        count_stage.insert("$count".to_string(), json!(COUNT_FIELD));
        stages.push(count_stage);

        let mut stream = self.aggregate(collection, &stages).await?;
        match stream.next().await {
            Some(doc) => Ok(doc?.get(COUNT_FIELD).and_then(Value::as_u64).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Submit an unordered batch
    ///
    /// Partial failures are reported as [`StoreError::BulkWrite`] carrying the
    /// counts of the operations that did succeed.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteModel>,
    ) -> StoreResult<BulkWriteResult>;

    /// Rename a collection; fails if `from` is missing or `to` exists
    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()>;

    /// Drop a collection; fails with [`StoreError::CollectionNotFound`] if missing
    async fn drop_collection(&self, name: &str) -> StoreResult<()>;

    /// Change the validation level of a collection
    async fn set_validation_level(&self, collection: &str, level: ValidationLevel)
        -> StoreResult<()>;
}
