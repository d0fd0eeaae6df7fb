//! # Update Specifications
//!
//! What a migration does to each matched document, and how that is recorded
//! so a later rollback can replay its inverse.
//!
//! # Design Principles
//!
//! 1. **Declarative first**: `$set` / `$unset` with optional array filters
//! 2. **Explicit variants**: per-document deletion and whole-collection deletion are
//!    tagged variants, never marker values
//! 3. **Replayable**: the operation applied to a document is serialized next to its backup

pub mod rollback_query;

pub use rollback_query::compute_rollback_spec;

use crate::document::Document;
use futures_util::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Error type user callbacks may return
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Replay text recorded for a per-document deletion
pub const DELETE_REPLAY_MARKER: &str = "$delete";

/// Declarative update operators applied to a single document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSpec {
    /// Dotted path -> new value
    #[serde(rename = "$set", default, skip_serializing_if = "Map::is_empty")]
    pub set: Document,

    /// Dotted path -> ignored marker (conventionally `1`)
    #[serde(rename = "$unset", default, skip_serializing_if = "Map::is_empty")]
    pub unset: Document,

    /// Predicates binding the `$[name]` segments used in `set` / `unset`
    #[serde(rename = "arrayFilters", default, skip_serializing_if = "Vec::is_empty")]
    pub array_filters: Vec<Value>,
}

/// The inverse of an [`UpdateSpec`]; same shape, applied during rollback
pub type RollbackSpec = UpdateSpec;

impl UpdateSpec {
    /// Create an empty specification
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` at `path`
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.insert(path.into(), value);
        self
    }

    /// Remove the field at `path`
    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.unset.insert(path.into(), Value::from(1));
        self
    }

    /// Bind an array filter predicate
    pub fn array_filter(mut self, filter: Value) -> Self {
        self.array_filters.push(filter);
        self
    }

    /// True if the specification changes nothing
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// The operator document sent to the store (array filters travel separately)
    pub fn to_update_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set".to_string(), Value::Object(self.set.clone()));
        }
        if !self.unset.is_empty() {
            update.insert("$unset".to_string(), Value::Object(self.unset.clone()));
        }
        update
    }
}

/// Resolved operation for one document
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOperation {
    /// Apply operators to the document
    Update(UpdateSpec),
    /// Remove the document
    Delete,
}

impl DocumentOperation {
    /// Text stored alongside the backup so rollback can rebuild the inverse
    pub fn replay_text(&self) -> serde_json::Result<String> {
        match self {
            DocumentOperation::Update(spec) => serde_json::to_string(spec),
            DocumentOperation::Delete => serde_json::to_string(DELETE_REPLAY_MARKER),
        }
    }
}

/// Operation recovered from a backup record's replay text
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOperation {
    /// Operators were applied; invert them
    Update(UpdateSpec),
    /// The document was removed; reinsert it
    Delete,
    /// No operator was recorded; the backup replaces the document fields
    FullOverwrite,
}

impl RecordedOperation {
    /// Parse replay text (`null` means a full overwrite)
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Null => Ok(RecordedOperation::FullOverwrite),
            Value::String(marker) if marker == DELETE_REPLAY_MARKER => Ok(RecordedOperation::Delete),
            other => serde_json::from_value(other).map(RecordedOperation::Update),
        }
    }
}

/// Per-document update callback
pub type UpdateFn = Arc<
    dyn Fn(Document) -> BoxFuture<'static, Result<DocumentOperation, CallbackError>> + Send + Sync,
>;

/// Per-document rollback callback, receiving the recorded backup subset
pub type RollbackFn =
    Arc<dyn Fn(Document) -> BoxFuture<'static, Result<RollbackSpec, CallbackError>> + Send + Sync>;

/// Wrap an async closure as a [`RollbackFn`]
pub fn rollback_fn<F, Fut>(f: F) -> RollbackFn
where
    F: Fn(Document) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RollbackSpec, CallbackError>> + Send + 'static,
{
    Arc::new(move |backup| Box::pin(f(backup)))
}

/// What a migration applies to the matched documents
#[derive(Clone)]
pub enum MigrationUpdate {
    /// Same operators for every document
    Static(UpdateSpec),
    /// Operators computed per document
    Dynamic(UpdateFn),
    /// Remove every matched document
    DeleteDocuments,
    /// Remove the whole collection (set aside under the backup name)
    DeleteCollection,
}

impl MigrationUpdate {
    /// Wrap an async closure as a dynamic update
    pub fn dynamic<F, Fut>(f: F) -> Self
    where
        F: Fn(Document) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DocumentOperation, CallbackError>> + Send + 'static,
    {
        MigrationUpdate::Dynamic(Arc::new(move |doc| Box::pin(f(doc))))
    }

    /// Wrap a synchronous closure as a dynamic update
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Document) -> Result<DocumentOperation, CallbackError> + Send + Sync + 'static,
    {
        MigrationUpdate::Dynamic(Arc::new(move |doc| Box::pin(future::ready(f(doc)))))
    }

    /// Resolve the operation for one document
    pub async fn evaluate(&self, doc: Document) -> Result<DocumentOperation, CallbackError> {
        match self {
            MigrationUpdate::Static(spec) => Ok(DocumentOperation::Update(spec.clone())),
            MigrationUpdate::Dynamic(f) => f(doc).await,
            MigrationUpdate::DeleteDocuments => Ok(DocumentOperation::Delete),
            MigrationUpdate::DeleteCollection => {
                Err("collection deletion has no per-document operation".into())
            }
        }
    }
}

impl fmt::Debug for MigrationUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationUpdate::Static(spec) => f.debug_tuple("Static").field(spec).finish(),
            MigrationUpdate::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
            MigrationUpdate::DeleteDocuments => f.write_str("DeleteDocuments"),
            MigrationUpdate::DeleteCollection => f.write_str("DeleteCollection"),
        }
    }
}

impl From<UpdateSpec> for MigrationUpdate {
    fn from(spec: UpdateSpec) -> Self {
        MigrationUpdate::Static(spec)
    }
}
