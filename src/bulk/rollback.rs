//! Rollback accumulator: restorations applied to the live collection

use super::{BulkAccumulator, BulkKind};
use crate::document::{Document, ID_FIELD};
use crate::store::WriteModel;
use crate::update::RollbackSpec;
use serde_json::Value;

/// Marker for [`RollbackAccumulator`]
pub struct Rollback;

impl BulkKind for Rollback {
    const FLUSH_MESSAGE: &'static str = "Documents rollback is successful";
}

/// Accumulates restorations
pub type RollbackAccumulator = BulkAccumulator<Rollback>;

impl BulkAccumulator<Rollback> {
    /// Queue the inverse operators for the document identified by `id`
    ///
    /// With `upsert`, a document deleted since the migration is recreated from
    /// the restored fields.
    pub fn add_restore(&mut self, id: &Value, spec: &RollbackSpec, upsert: bool) {
        let mut filter = Document::new();
        filter.insert(ID_FIELD.to_string(), id.clone());

        self.push(WriteModel::UpdateOne {
            filter,
            update: spec.to_update_document(),
            array_filters: spec.array_filters.clone(),
            upsert,
        });
    }

    /// Queue the reinsertion of a deleted document
    pub fn add_reinsert(&mut self, id: &Value, backup: &Document) {
        let mut document = backup.clone();
        document.insert(ID_FIELD.to_string(), id.clone());
        self.push(WriteModel::InsertOne { document });
    }
}
