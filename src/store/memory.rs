//! # In-Memory Document Store
//!
//! A complete [`DocumentStore`] held in process memory.
//!
//! # Design Principles
//!
//! 1. **Faithful**: unordered bulk semantics, upserts, validation levels and
//!    write error codes behave like a real document database
//! 2. **Deterministic**: documents are kept in insertion order
//! 3. **Observable**: snapshots of collections are available for assertions
//!
//! Collection validators are plain filters: a document is valid when it matches.

use super::apply::{apply_update, upsert_seed, UpdateFailure};
use super::errors::{StoreError, StoreResult, DUPLICATE_KEY_CODE, VALIDATION_FAILED_CODE};
use super::filter::{apply_projection, matches_filter, run_pipeline};
use super::{
    BulkWriteResult, DocumentStore, DocumentStream, ValidationLevel, WriteError, WriteModel,
    COUNT_FIELD,
};
use crate::document::{Document, ID_FIELD};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct CollectionState {
    documents: Vec<Document>,
    validator: Option<Document>,
    validation_level: ValidationLevel,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            validator: None,
            validation_level: ValidationLevel::Strict,
        }
    }
}

impl CollectionState {
    fn is_valid(&self, doc: &Document) -> StoreResult<bool> {
        match &self.validator {
            Some(validator) => matches_filter(&Value::Object(doc.clone()), validator),
            None => Ok(true),
        }
    }

    /// Validate a document about to be inserted
    fn check_insert(&self, doc: &Document) -> Result<(), UpdateFailure> {
        if self.validation_level == ValidationLevel::Off || self.is_valid(doc)? {
            return Ok(());
        }
        Err(validation_failure())
    }

    /// Validate a replacement of `previous` by `next`
    fn check_update(&self, previous: &Document, next: &Document) -> Result<(), UpdateFailure> {
        let checked = match self.validation_level {
            ValidationLevel::Off => false,
            ValidationLevel::Strict => true,
            ValidationLevel::Moderate => self.is_valid(previous)?,
        };
        if !checked || self.is_valid(next)? {
            return Ok(());
        }
        Err(validation_failure())
    }

    fn position(&self, filter: &Document) -> Result<Option<usize>, UpdateFailure> {
        for (idx, doc) in self.documents.iter().enumerate() {
            if matches_filter(&Value::Object(doc.clone()), filter)? {
                return Ok(Some(idx));
            }
        }
        Ok(None)
    }

    fn has_id(&self, id: &Value) -> bool {
        self.documents.iter().any(|doc| doc.get(ID_FIELD) == Some(id))
    }

    fn insert(&mut self, mut doc: Document) -> Result<Value, UpdateFailure> {
        let id = doc
            .entry(ID_FIELD.to_string())
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()))
            .clone();
        if self.has_id(&id) {
            return Err(UpdateFailure {
                code: DUPLICATE_KEY_CODE,
                message: format!("E11000 duplicate key error index: _id_ dup key: {{ _id: {} }}", id),
            });
        }
        self.check_insert(&doc)?;
        self.documents.push(doc);
        Ok(id)
    }

    fn execute(&mut self, operation: WriteModel, result: &mut BulkWriteResult) -> Result<(), UpdateFailure> {
        match operation {
            WriteModel::InsertOne { document } => {
                let id = self.insert(document)?;
                result.inserted_count += 1;
                result.inserted_ids.push(id);
            }
            WriteModel::UpdateOne {
                filter,
                update,
                array_filters,
                upsert,
            } => match self.position(&filter)? {
                Some(idx) => {
                    let previous = &self.documents[idx];
                    let next = apply_update(previous, &update, &array_filters, false)?;
                    result.matched_count += 1;
                    if &next != previous {
                        self.check_update(previous, &next)?;
                        self.documents[idx] = next;
                        result.modified_count += 1;
                    }
                }
                None if upsert => {
                    let seed = upsert_seed(&filter);
                    let created = apply_update(&seed, &update, &array_filters, true)?;
                    let id = self.insert(created)?;
                    result.upserted_count += 1;
                    result.upserted_ids.push(id);
                }
                None => {}
            },
            WriteModel::DeleteOne { filter } => {
                if let Some(idx) = self.position(&filter)? {
                    self.documents.remove(idx);
                    result.deleted_count += 1;
                }
            }
        }
        Ok(())
    }
}

fn validation_failure() -> UpdateFailure {
    UpdateFailure {
        code: VALIDATION_FAILED_CODE,
        message: "Document failed validation".to_string(),
    }
}

/// In-memory document store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, CollectionState>>,
    count_latency: Option<Duration>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every count by `latency` (simulates an expensive count)
    pub fn with_count_latency(mut self, latency: Duration) -> Self {
        self.count_latency = Some(latency);
        self
    }

    /// Create an empty collection without validation
    pub async fn create_collection(&self, name: &str) -> StoreResult<()> {
        self.create(name, CollectionState::default()).await
    }

    /// Create an empty collection with a filter validator
    pub async fn create_collection_with_validator(
        &self,
        name: &str,
        validator: Document,
        level: ValidationLevel,
    ) -> StoreResult<()> {
        self.create(
            name,
            CollectionState {
                validator: Some(validator),
                validation_level: level,
                ..CollectionState::default()
            },
        )
        .await
    }

    async fn create(&self, name: &str, state: CollectionState) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(StoreError::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), state);
        Ok(())
    }

    /// Insert documents, returning their ids
    pub async fn insert_many(&self, name: &str, documents: Vec<Document>) -> StoreResult<Vec<Value>> {
        let operations = documents
            .into_iter()
            .map(|document| WriteModel::InsertOne { document })
            .collect();
        Ok(self.bulk_write(name, operations).await?.inserted_ids)
    }

    /// Snapshot of a collection in insertion order (empty if missing)
    pub async fn documents(&self, name: &str) -> Vec<Document> {
        let collections = self.collections.read().await;
        collections
            .get(name)
            .map(|state| state.documents.clone())
            .unwrap_or_default()
    }

    /// Check whether a collection exists
    pub async fn collection_exists(&self, name: &str) -> bool {
        self.collections.read().await.contains_key(name)
    }

    /// Current validation level of a collection
    pub async fn validation_level(&self, name: &str) -> Option<ValidationLevel> {
        let collections = self.collections.read().await;
        collections.get(name).map(|state| state.validation_level)
    }

    async fn snapshot(&self, name: &str) -> Vec<Document> {
        self.documents(name).await
    }

    async fn simulate_count_latency(&self) {
        if let Some(latency) = self.count_latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn into_stream(documents: Vec<Document>) -> DocumentStream {
    stream::iter(documents.into_iter().map(Ok)).boxed()
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> StoreResult<DocumentStream> {
        let mut selected = Vec::new();
        for doc in self.snapshot(collection).await {
            if matches_filter(&Value::Object(doc.clone()), filter)? {
                selected.push(match projection {
                    Some(projection) => apply_projection(&doc, projection)?,
                    None => doc,
                });
            }
        }
        Ok(into_stream(selected))
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Document],
    ) -> StoreResult<DocumentStream> {
        let documents = self.snapshot(collection).await;
        Ok(into_stream(run_pipeline(documents, pipeline)?))
    }

    async fn count_documents(&self, collection: &str, filter: &Document) -> StoreResult<u64> {
        self.simulate_count_latency().await;
        let mut count = 0;
        for doc in self.snapshot(collection).await {
            if matches_filter(&Value::Object(doc), filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_pipeline(&self, collection: &str, pipeline: &[Document]) -> StoreResult<u64> {
        self.simulate_count_latency().await;
        let mut stages = pipeline.to_vec();
        let mut count_stage = Document::new();
        count_stage.insert("$count".to_string(), json!(COUNT_FIELD));
        stages.push(count_stage);

        let counted = run_pipeline(self.snapshot(collection).await, &stages)?;
        Ok(counted
            .first()
            .and_then(|doc| doc.get(COUNT_FIELD))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteModel>,
    ) -> StoreResult<BulkWriteResult> {
        if operations.is_empty() {
            return Err(StoreError::InvalidUpdate(
                "Invalid BulkOperation, Batch cannot be empty".to_string(),
            ));
        }

        let mut collections = self.collections.write().await;
        let state = collections.entry(collection.to_string()).or_default();
        let mut result = BulkWriteResult::default();

        for (index, operation) in operations.into_iter().enumerate() {
            if let Err(failure) = state.execute(operation, &mut result) {
                result.write_errors.push(WriteError {
                    index,
                    code: failure.code,
                    message: failure.message,
                });
            }
        }

        if result.write_errors.is_empty() {
            Ok(result)
        } else {
            Err(StoreError::BulkWrite { result })
        }
    }

    async fn rename_collection(&self, from: &str, to: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(to) {
            return Err(StoreError::CollectionExists(to.to_string()));
        }
        let state = collections
            .remove(from)
            .ok_or_else(|| StoreError::CollectionNotFound(from.to_string()))?;
        collections.insert(to.to_string(), state);
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    async fn set_validation_level(
        &self,
        collection: &str,
        level: ValidationLevel,
    ) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let state = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        state.validation_level = level;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn update_one(id: i64, update: Value, upsert: bool) -> WriteModel {
        WriteModel::UpdateOne {
            filter: doc(json!({ "_id": id })),
            update: doc(update),
            array_filters: Vec::new(),
            upsert,
        }
    }

    #[tokio::test]
    async fn test_insert_find_and_project() {
        let store = InMemoryStore::new();
        store
            .insert_many("items", vec![doc(json!({ "_id": 1, "a": 1, "b": 2 })), doc(json!({ "_id": 2, "a": 5 }))])
            .await
            .unwrap();

        let found: Vec<Document> = store
            .find("items", &doc(json!({ "a": { "$gt": 2 } })), Some(&doc(json!({ "a": 1 }))))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(found, vec![doc(json!({ "_id": 2, "a": 5 }))]);

        let missing: Vec<Document> = store
            .find("nothing", &Document::new(), None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_insert_generates_ids_and_rejects_duplicates() {
        let store = InMemoryStore::new();
        let ids = store.insert_many("items", vec![doc(json!({ "a": 1 }))]).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids[0].is_string());

        let result = store.insert_many("items", vec![doc(json!({ "_id": ids[0].clone() }))]).await;
        match result {
            Err(StoreError::BulkWrite { result }) => {
                assert_eq!(result.write_errors[0].code, DUPLICATE_KEY_CODE);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_counts_matched_and_modified() {
        let store = InMemoryStore::new();
        store
            .insert_many("items", vec![doc(json!({ "_id": 1, "key": 1 })), doc(json!({ "_id": 2, "key": 2 }))])
            .await
            .unwrap();

        let result = store
            .bulk_write(
                "items",
                vec![
                    update_one(1, json!({ "$set": { "key": 2 } }), false),
                    update_one(2, json!({ "$set": { "key": 2 } }), false),
                    update_one(3, json!({ "$set": { "key": 2 } }), false),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.upserted_count, 0);
    }

    #[tokio::test]
    async fn test_upsert_with_set_on_insert_is_insert_only() {
        let store = InMemoryStore::new();
        let op = || update_one(1, json!({ "$setOnInsert": { "_id": 1, "v": "first" } }), true);

        let first = store.bulk_write("backups", vec![op()]).await.unwrap();
        assert_eq!(first.upserted_count, 1);
        assert_eq!(first.upserted_ids, vec![json!(1)]);

        let second = store
            .bulk_write(
                "backups",
                vec![update_one(1, json!({ "$setOnInsert": { "_id": 1, "v": "second" } }), true)],
            )
            .await
            .unwrap();
        assert_eq!(second.upserted_count, 0);
        assert_eq!(second.matched_count, 1);
        assert_eq!(second.modified_count, 0);
        assert_eq!(store.documents("backups").await, vec![doc(json!({ "_id": 1, "v": "first" }))]);
    }

    #[tokio::test]
    async fn test_unordered_batch_keeps_going_after_failures() {
        let store = InMemoryStore::new();
        store
            .insert_many("items", vec![doc(json!({ "_id": 1 })), doc(json!({ "_id": 2 }))])
            .await
            .unwrap();

        let result = store
            .bulk_write(
                "items",
                vec![
                    update_one(1, json!({ "$set": { "$bad": 1 } }), false),
                    update_one(2, json!({ "$set": { "ok": true } }), false),
                ],
            )
            .await;
        let Err(StoreError::BulkWrite { result }) = result else {
            panic!("expected a partial failure");
        };
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.write_errors.len(), 1);
        assert_eq!(result.write_errors[0].index, 0);
    }

    #[tokio::test]
    async fn test_validation_levels() {
        let store = InMemoryStore::new();
        store
            .create_collection_with_validator(
                "strict",
                doc(json!({ "forbidden": { "$exists": false } })),
                ValidationLevel::Strict,
            )
            .await
            .unwrap();
        store.insert_many("strict", vec![doc(json!({ "_id": 1 }))]).await.unwrap();

        let rejected = store
            .bulk_write("strict", vec![update_one(1, json!({ "$set": { "forbidden": 1 } }), false)])
            .await;
        assert!(matches!(rejected, Err(StoreError::BulkWrite { .. })));

        store.set_validation_level("strict", ValidationLevel::Off).await.unwrap();
        store
            .bulk_write("strict", vec![update_one(1, json!({ "$set": { "forbidden": 1 } }), false)])
            .await
            .unwrap();

        // Moderate leaves already-invalid documents alone
        store.set_validation_level("strict", ValidationLevel::Moderate).await.unwrap();
        store
            .bulk_write("strict", vec![update_one(1, json!({ "$set": { "other": 1 } }), false)])
            .await
            .unwrap();
        assert_eq!(store.validation_level("strict").await, Some(ValidationLevel::Moderate));
    }

    #[tokio::test]
    async fn test_rename_and_drop() {
        let store = InMemoryStore::new();
        store.insert_many("a", vec![doc(json!({ "_id": 1 }))]).await.unwrap();

        store.rename_collection("a", "b").await.unwrap();
        assert!(!store.collection_exists("a").await);
        assert_eq!(store.documents("b").await.len(), 1);

        let missing = store.rename_collection("a", "c").await;
        assert!(matches!(missing, Err(StoreError::CollectionNotFound(_))));

        store.drop_collection("b").await.unwrap();
        let dropped_again = store.drop_collection("b").await;
        assert!(dropped_again.unwrap_err().is_collection_not_found());
    }

    #[tokio::test]
    async fn test_pipeline_count() {
        let store = InMemoryStore::new();
        store
            .insert_many("items", (1..=4).map(|n| doc(json!({ "n": n }))).collect())
            .await
            .unwrap();

        let pipeline = vec![doc(json!({ "$match": { "n": { "$gte": 3 } } }))];
        assert_eq!(store.count_pipeline("items", &pipeline).await.unwrap(), 2);

        let none = vec![doc(json!({ "$match": { "n": 99 } }))];
        assert_eq!(store.count_pipeline("items", &none).await.unwrap(), 0);
    }
}
