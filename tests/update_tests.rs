mod common;

use bulk_data_migration::store::ValidationLevel;
use bulk_data_migration::{
    BulkOperationResult, DocumentOperation, InMemoryStore, MigrationOptions, MigrationUpdate,
    UpdateSpec,
};
use common::{doc, without_ids, Fixture, BACKUP_COLLECTION, COLLECTION, IDEMPOTENCY_WARNING};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIGRATION_FLUSH: &str = "Documents migration is successful";

#[tokio::test]
async fn test_update_matching_documents() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "key": 1, "other": 1 }), json!({ "key": 2, "other": 1 }), json!({ "key": 3, "other": 1 })])
        .await;

    let migration = fixture
        .migration()
        .filter(doc(json!({ "key": { "$gt": 1 } })))
        .update(UpdateSpec::new().set("key", json!(2)))
        .build(fixture.store.clone())
        .unwrap();

    let result = migration.update().await.unwrap();

    assert_eq!(
        result,
        BulkOperationResult {
            n_matched: 2,
            n_modified: 1,
            ..BulkOperationResult::default()
        }
    );
    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 1, "other": 1 }), json!({ "key": 2, "other": 1 }), json!({ "key": 2, "other": 1 })]
    );

    let backups = fixture.backups().await;
    assert_eq!(backups.len(), 2);
    assert_eq!(backups[0]["backup"]["key"], json!(2));
    assert_eq!(backups[0]["updateSpec"], json!(r#"{"$set":{"key":2}}"#));
    assert!(fixture.logger.warnings().is_empty());
}

#[tokio::test]
async fn test_resume_after_failure() {
    let fixture = Fixture::new();
    let inserted = fixture
        .seed((1..=5).map(|key| json!({ "key": key })).collect())
        .await;

    let fail_once = Arc::new(AtomicBool::new(true));
    let update = {
        let fail_once = fail_once.clone();
        MigrationUpdate::from_fn(move |document| {
            let key = document["key"].as_i64().unwrap_or_default();
            if key == 4 && fail_once.swap(false, Ordering::SeqCst) {
                return Err("transient failure".into());
            }
            Ok(DocumentOperation::Update(UpdateSpec::new().set("key", json!(key * 10))))
        })
    };

    let migration = fixture
        .migration()
        .update(update)
        .options(MigrationOptions {
            max_bulk_size: 2,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();

    assert!(migration.update().await.is_err());
    assert_eq!(fixture.backups().await.len(), 2);
    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 10 }), json!({ "key": 20 }), json!({ "key": 3 }), json!({ "key": 4 }), json!({ "key": 5 })]
    );

    migration.update().await.unwrap();
    assert_eq!(fixture.backups().await.len(), 5);
    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 100 }), json!({ "key": 200 }), json!({ "key": 30 }), json!({ "key": 40 }), json!({ "key": 50 })]
    );

    migration.rollback().await.unwrap();
    assert_eq!(fixture.documents().await, inserted);
}

fn delayed_update(counter: Arc<AtomicU64>) -> MigrationUpdate {
    MigrationUpdate::dynamic(move |document| {
        let counter = counter.clone();
        async move {
            let delay = document["delay"].as_u64().unwrap_or_default();
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let position = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(DocumentOperation::Update(
                UpdateSpec::new().set("returnPosition", json!(position)),
            ))
        }
    })
}

fn positions(documents: Vec<bulk_data_migration::Document>) -> Vec<Value> {
    documents
        .into_iter()
        .map(|document| document["returnPosition"].clone())
        .collect()
}

#[tokio::test]
async fn test_updates_one_by_one() {
    let fixture = Fixture::new();
    fixture.seed(vec![json!({ "delay": 30 }), json!({ "delay": 0 })]).await;

    let migration = fixture
        .migration()
        .update(delayed_update(Arc::new(AtomicU64::new(0))))
        .options(MigrationOptions {
            max_concurrent_update_calls: 1,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    assert_eq!(positions(fixture.documents().await), vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_parallel_updates() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "delay": 60 }), json!({ "delay": 15 }), json!({ "delay": 5 })])
        .await;

    let migration = fixture
        .migration()
        .update(delayed_update(Arc::new(AtomicU64::new(0))))
        .options(MigrationOptions {
            max_concurrent_update_calls: 2,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    assert_eq!(positions(fixture.documents().await), vec![json!(3), json!(1), json!(2)]);
}

#[tokio::test]
async fn test_parallelism_stops_at_batch_boundaries() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "delay": 30 }), json!({ "delay": 0 }), json!({ "delay": 5 })])
        .await;

    let migration = fixture
        .migration()
        .update(delayed_update(Arc::new(AtomicU64::new(0))))
        .options(MigrationOptions {
            max_concurrent_update_calls: 5,
            max_bulk_size: 2,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    let mut first_batch = positions(fixture.documents().await)[..2].to_vec();
    first_batch.sort_by_key(|position| position.as_u64());
    assert_eq!(first_batch, vec![json!(1), json!(2)]);
    assert_eq!(positions(fixture.documents().await)[2], json!(3));
}

async fn batch_sizes(rollbackable: bool) -> Vec<Value> {
    let fixture = Fixture::new();
    fixture
        .seed((1..=100).map(|value| json!({ "value": value })).collect())
        .await;

    let migration = fixture
        .migration()
        .update(MigrationUpdate::from_fn(|document| {
            let value = document["value"].as_i64().unwrap_or_default();
            Ok(DocumentOperation::Update(UpdateSpec::new().set("value", json!(value * 2))))
        }))
        .options(MigrationOptions {
            max_bulk_size: 30,
            max_concurrent_update_calls: 1000,
            rollbackable,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    fixture.logged_field(MIGRATION_FLUSH, "nModified")
}

#[tokio::test]
async fn test_updates_in_batches() {
    let expected = vec![json!(30), json!(30), json!(30), json!(10)];
    assert_eq!(batch_sizes(false).await, expected);
    assert_eq!(batch_sizes(true).await, expected);
}

#[tokio::test]
async fn test_batch_progress_is_logged() {
    let fixture = Fixture::new();
    fixture
        .seed((1..=4).map(|value| json!({ "value": value })).collect())
        .await;

    let migration = fixture
        .migration()
        .update(UpdateSpec::new().set("seen", json!(true)))
        .options(MigrationOptions {
            max_bulk_size: 3,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    assert_eq!(
        fixture.logged_field(MIGRATION_FLUSH, "progress"),
        vec![
            json!({ "totalOperationsDone": 3, "estimatedTotalOperations": 4, "percent": "75.00" }),
            json!({ "totalOperationsDone": 4, "estimatedTotalOperations": 4, "percent": "100.00" }),
        ]
    );
    assert_eq!(
        fixture.logged_field("Starting migration UPDATE process", "totalEntries"),
        vec![json!(4)]
    );
    assert_eq!(fixture.logger.payloads_for("Documents backup is successful").len(), 2);
    assert_eq!(fixture.logger.payloads_for("Ending migration UPDATE process").len(), 1);
}

#[tokio::test]
async fn test_update_with_pipeline() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "key": 1, "letThis": true }), json!({ "key": 1 }), json!({ "key": 5 })])
        .await;

    let migration = fixture
        .migration()
        .pipeline(vec![doc(json!({ "$match": { "key": { "$lt": 3 } } }))])
        .update(MigrationUpdate::from_fn(|document| {
            let key = document["key"].as_i64().unwrap_or_default();
            Ok(DocumentOperation::Update(UpdateSpec::new().set("key", json!(key * 2))))
        }))
        .build(fixture.store.clone())
        .unwrap();

    let result = migration.update().await.unwrap();

    assert_eq!(
        result,
        BulkOperationResult {
            n_matched: 2,
            n_modified: 2,
            ..BulkOperationResult::default()
        }
    );
    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 2, "letThis": true }), json!({ "key": 2 }), json!({ "key": 5 })]
    );
}

#[tokio::test]
async fn test_projection_is_appended_to_pipeline() {
    let fixture = Fixture::new();
    let inserted = fixture.seed(vec![json!({ "a": 1, "b": 2 })]).await;

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let update = {
        let seen = seen.clone();
        MigrationUpdate::from_fn(move |document| {
            seen.lock().unwrap().push(document);
            Ok(DocumentOperation::Update(UpdateSpec::new().set("b", json!(99))))
        })
    };

    let migration = fixture
        .migration()
        .pipeline(vec![doc(json!({ "$match": { "a": { "$exists": true } } }))])
        .projection(doc(json!({ "b": 1 })))
        .update(update)
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![doc(json!({ "_id": inserted[0]["_id"].clone(), "b": 2 }))]);
}

#[tokio::test]
async fn test_zero_matching_documents() {
    let fixture = Fixture::new();

    let migration = fixture
        .migration()
        .pipeline(vec![doc(json!({ "$match": { "missing": true } }))])
        .update(UpdateSpec::new().set("a", json!(1)))
        .build(fixture.store.clone())
        .unwrap();

    let result = migration.update().await.unwrap();

    assert_eq!(result, BulkOperationResult::default());
    assert_eq!(
        fixture.logged_field("Starting migration UPDATE process", "totalEntries"),
        vec![json!(0)]
    );
    assert!(fixture.logger.payloads_for(MIGRATION_FLUSH).is_empty());
}

#[tokio::test]
async fn test_continue_on_bulk_write_error() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "key": 1 }), json!({ "key": 2 }), json!({ "key": 2 })])
        .await;

    let migration = fixture
        .migration()
        .update(MigrationUpdate::from_fn(|document| {
            let spec = if document["key"] == json!(2) {
                UpdateSpec::new().set("$nonAllowedChar", json!("any"))
            } else {
                UpdateSpec::new().set("key", json!(10))
            };
            Ok(DocumentOperation::Update(spec))
        }))
        .options(MigrationOptions {
            continue_on_bulk_write_error: true,
            max_bulk_size: 1,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();

    let result = migration.update().await.unwrap();

    assert_eq!(result.n_matched, 3);
    assert_eq!(result.n_modified, 1);
    assert!(result.ok);
    assert_eq!(result.write_errors.len(), 2);
    assert!(result.write_errors[0].message.contains(
        "The dollar ($) prefixed field '$nonAllowedChar' in '$nonAllowedChar' is not allowed in the context"
    ));
}

#[tokio::test]
async fn test_bulk_write_error_stops_by_default() {
    let fixture = Fixture::new();
    fixture.seed(vec![json!({ "key": 1 }), json!({ "key": 2 })]).await;

    let migration = fixture
        .migration()
        .update(UpdateSpec::new().set("$bad", json!(1)))
        .build(fixture.store.clone())
        .unwrap();

    let err = migration.update().await.unwrap_err();
    assert!(err.is_partial_write());
    assert_eq!(fixture.backups().await.len(), 2);
}

#[tokio::test]
async fn test_bypass_update_validation() {
    let fixture = Fixture::new();
    fixture
        .store
        .create_collection_with_validator(
            COLLECTION,
            doc(json!({ "invalid_key": { "$exists": false } })),
            ValidationLevel::Strict,
        )
        .await
        .unwrap();
    fixture.seed(vec![json!({ "key": 1 })]).await;

    let rejected = fixture
        .migration()
        .update(UpdateSpec::new().set("invalid_key", json!("update")))
        .build(fixture.store.clone())
        .unwrap();
    assert!(rejected.update().await.unwrap_err().is_partial_write());
    assert_eq!(without_ids(fixture.documents().await), vec![json!({ "key": 1 })]);

    let bypassing = fixture
        .migration()
        .update(UpdateSpec::new().set("invalid_key", json!("update")))
        .options(MigrationOptions {
            bypass_update_validation: true,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    bypassing.update().await.unwrap();

    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 1, "invalid_key": "update" })]
    );
    assert_eq!(
        fixture.store.validation_level(COLLECTION).await,
        Some(ValidationLevel::Moderate)
    );
}

#[tokio::test]
async fn test_validation_restored_after_failure() {
    let fixture = Fixture::new();
    fixture.seed(vec![json!({ "key": 1 })]).await;

    let migration = fixture
        .migration()
        .update(MigrationUpdate::from_fn(|_| Err("boom".into())))
        .options(MigrationOptions {
            bypass_update_validation: true,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();

    assert!(migration.update().await.is_err());
    assert_eq!(
        fixture.store.validation_level(COLLECTION).await,
        Some(ValidationLevel::Moderate)
    );
}

#[tokio::test]
async fn test_not_rollbackable_writes_no_backup() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "key": 1 }), json!({ "key": 2 }), json!({ "key": 2 })])
        .await;

    let migration = fixture
        .migration()
        .update(UpdateSpec::new().set("value", json!(10)))
        .options(MigrationOptions {
            rollbackable: false,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    assert!(fixture.backups().await.is_empty());
    assert!(fixture.logger.warnings().is_empty());
}

#[tokio::test]
async fn test_projection_backup_filter() {
    let fixture = Fixture::new();
    fixture.seed(vec![json!({ "a": { "b": 1, "c": 2 }, "d": 3 })]).await;

    let migration = fixture
        .migration()
        .update(UpdateSpec::new().set("a.b", json!(5)))
        .options(MigrationOptions {
            projection_backup_filter: Some(vec!["a.b".to_string()]),
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    let backups = fixture.backups().await;
    assert_eq!(backups[0]["backup"], json!({ "a": { "b": 1 } }));
}

#[tokio::test]
async fn test_delete_documents() {
    let fixture = Fixture::new();
    let inserted = fixture
        .seed(vec![json!({ "key": 1 }), json!({ "key": 2 }), json!({ "key": 3 })])
        .await;

    let migration = fixture
        .migration()
        .filter(doc(json!({ "key": 2 })))
        .update(MigrationUpdate::DeleteDocuments)
        .build(fixture.store.clone())
        .unwrap();

    let result = migration.update().await.unwrap();

    assert_eq!(
        result,
        BulkOperationResult {
            n_removed: 1,
            ..BulkOperationResult::default()
        }
    );
    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 1 }), json!({ "key": 3 })]
    );
    let backups = fixture.backups().await;
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0]["backup"], Value::Object(inserted[1].clone()));
    assert_eq!(backups[0]["updateSpec"], json!(r#""$delete""#));
}

#[tokio::test]
async fn test_delete_collection_twice() {
    let fixture = Fixture::new();
    fixture.seed(vec![json!({ "key": 1 })]).await;

    let migration = fixture
        .migration()
        .update(MigrationUpdate::DeleteCollection)
        .build(fixture.store.clone())
        .unwrap();

    assert!(migration.update().await.unwrap().ok);
    assert!(!fixture.store.collection_exists(COLLECTION).await);
    assert!(fixture.store.collection_exists(BACKUP_COLLECTION).await);

    let second = migration.update().await.unwrap();
    assert!(!second.ok);
    assert_eq!(fixture.logger.warnings()[0].message, "Couldn't rename collection");
}

#[tokio::test]
async fn test_idempotency_warning() {
    let fixture = Fixture::new();
    fixture
        .seed(vec![json!({ "key": 1 }), json!({ "key": 2 }), json!({ "key": 3 })])
        .await;

    let constant = fixture
        .migration()
        .update(UpdateSpec::new().set("key", json!(100)))
        .build(fixture.store.clone())
        .unwrap();
    let first = constant.update().await.unwrap();
    let second = constant.update().await.unwrap();

    assert_eq!((first.n_matched, first.n_modified), (3, 3));
    assert_eq!((second.n_matched, second.n_modified), (3, 0));
    assert!(fixture.logger.warnings().is_empty());
    constant.rollback().await.unwrap();

    let counter = Arc::new(AtomicU64::new(0));
    let changing = fixture
        .migration()
        .update(MigrationUpdate::from_fn(move |_| {
            let next = counter.fetch_add(1, Ordering::SeqCst);
            Ok(DocumentOperation::Update(UpdateSpec::new().set("key", json!(1000 + next))))
        }))
        .build(fixture.store.clone())
        .unwrap();
    changing.update().await.unwrap();
    assert!(fixture.logger.warnings().is_empty());
    changing.update().await.unwrap();

    let warnings = fixture.logger.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].message, IDEMPOTENCY_WARNING);
    assert_eq!(
        warnings[0].payload,
        json!({ "totalNewBackupDocs": 0, "totalUpdatedDocument": 3 })
    );

    changing.rollback().await.unwrap();
    assert_eq!(
        without_ids(fixture.documents().await),
        vec![json!({ "key": 1 }), json!({ "key": 2 }), json!({ "key": 3 })]
    );
}

#[tokio::test]
async fn test_slow_count_warning() {
    let fixture = Fixture::with_store(InMemoryStore::new().with_count_latency(Duration::from_millis(50)));
    fixture.seed(vec![json!({ "key": 1 })]).await;

    let migration = fixture
        .migration()
        .update(UpdateSpec::new().set("key", json!(2)))
        .options(MigrationOptions {
            count_warning_threshold_ms: 5,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();
    migration.update().await.unwrap();

    let warnings = fixture.logger.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].message,
        "Count is taking a significant amount of time, consider using dontCount:true option"
    );
    assert_eq!(warnings[0].payload, json!({ "thresholdMs": 5 }));
    assert_eq!(
        fixture.logged_field("Starting migration UPDATE process", "totalEntries"),
        vec![json!(1)]
    );
}

#[tokio::test]
async fn test_throttle_between_batches() {
    let fixture = Fixture::new();
    fixture
        .seed((1..=4).map(|key| json!({ "key": key })).collect())
        .await;

    let migration = fixture
        .migration()
        .update(UpdateSpec::new().set("seen", json!(true)))
        .options(MigrationOptions {
            max_bulk_size: 2,
            throttle_ms: 20,
            ..MigrationOptions::default()
        })
        .build(fixture.store.clone())
        .unwrap();

    let started = Instant::now();
    migration.update().await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(40));
}
