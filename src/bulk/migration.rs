//! Migration accumulator: the mutations applied to the live collection

use super::{BulkAccumulator, BulkKind};
use crate::document::{Document, ID_FIELD};
use crate::store::WriteModel;
use crate::update::DocumentOperation;
use serde_json::Value;

/// Marker for [`MigrationAccumulator`]
pub struct Migration;

impl BulkKind for Migration {
    const FLUSH_MESSAGE: &'static str = "Documents migration is successful";
}

/// Accumulates per-document mutations
pub type MigrationAccumulator = BulkAccumulator<Migration>;

impl BulkAccumulator<Migration> {
    /// Queue `operation` against the document identified by `id`
    pub fn add_operation(&mut self, id: &Value, operation: &DocumentOperation) {
        let mut filter = Document::new();
        filter.insert(ID_FIELD.to_string(), id.clone());

        let model = match operation {
            DocumentOperation::Update(spec) => WriteModel::UpdateOne {
                filter,
                update: spec.to_update_document(),
                array_filters: spec.array_filters.clone(),
                upsert: false,
            },
            DocumentOperation::Delete => WriteModel::DeleteOne { filter },
        };
        self.push(model);
    }
}
