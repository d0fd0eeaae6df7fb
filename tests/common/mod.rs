//! Shared fixtures for migration integration tests

#![allow(dead_code)]

use bulk_data_migration::store::WriteModel;
use bulk_data_migration::{
    BulkDataMigration, BulkDataMigrationBuilder, Document, DocumentStore, InMemoryStore,
    RecordingLogger,
};
use serde_json::Value;
use std::sync::Arc;

pub const COLLECTION: &str = "testCollection";
pub const SCRIPT_ID: &str = "scriptId";
pub const BACKUP_COLLECTION: &str = "_rollback_testCollection_scriptId";

pub const IDEMPOTENCY_WARNING: &str = "The number of backup documents should be equal to the total updated documents. Check your query is idempotent or ensure you don't use a same migration id for different migrations.";

/// Build a document from a JSON object literal
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

fn id_filter(document: &Document) -> Document {
    let mut filter = Document::new();
    filter.insert("_id".to_string(), document["_id"].clone());
    filter
}

/// Strip `_id` from every document
pub fn without_ids(documents: Vec<Document>) -> Vec<Value> {
    documents
        .into_iter()
        .map(|mut document| {
            document.remove("_id");
            Value::Object(document)
        })
        .collect()
}

/// Sort documents by their `_id` rendering
pub fn sorted_by_id(mut documents: Vec<Document>) -> Vec<Document> {
    documents.sort_by_key(|document| document.get("_id").map(|id| id.to_string()));
    documents
}

/// An in-memory store and a recording logger shared by a test
pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub logger: Arc<RecordingLogger>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(InMemoryStore::new())
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        Self {
            store: Arc::new(store),
            logger: Arc::new(RecordingLogger::new()),
        }
    }

    /// Insert into the test collection and return the stored documents
    pub async fn seed(&self, documents: Vec<Value>) -> Vec<Document> {
        self.store
            .insert_many(COLLECTION, documents.into_iter().map(doc).collect())
            .await
            .unwrap();
        self.documents().await
    }

    /// Builder for the test migration, logging into the fixture logger
    pub fn migration(&self) -> BulkDataMigrationBuilder {
        BulkDataMigration::builder(COLLECTION, SCRIPT_ID).logger(self.logger.clone())
    }

    pub async fn documents(&self) -> Vec<Document> {
        self.store.documents(COLLECTION).await
    }

    /// Apply `update` to every document of the test collection, outside any migration
    pub async fn update_all(&self, update: Value) {
        let operations: Vec<WriteModel> = self
            .documents()
            .await
            .into_iter()
            .map(|document| WriteModel::UpdateOne {
                filter: id_filter(&document),
                update: doc(update.clone()),
                array_filters: Vec::new(),
                upsert: false,
            })
            .collect();
        self.store.bulk_write(COLLECTION, operations).await.unwrap();
    }

    /// Remove every document of the test collection, outside any migration
    pub async fn delete_all(&self) {
        let operations: Vec<WriteModel> = self
            .documents()
            .await
            .into_iter()
            .map(|document| WriteModel::DeleteOne {
                filter: id_filter(&document),
            })
            .collect();
        self.store.bulk_write(COLLECTION, operations).await.unwrap();
    }

    pub async fn backups(&self) -> Vec<Document> {
        self.store.documents(BACKUP_COLLECTION).await
    }

    /// `field` of every payload logged with `message`
    pub fn logged_field(&self, message: &str, field: &str) -> Vec<Value> {
        self.logger
            .payloads_for(message)
            .into_iter()
            .map(|payload| payload.get(field).cloned().unwrap_or(Value::Null))
            .collect()
    }
}
