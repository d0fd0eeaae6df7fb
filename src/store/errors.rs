//! # Store Errors

use super::BulkWriteResult;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error code reported for a duplicate `_id`
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Error code reported when a document fails collection validation
pub const VALIDATION_FAILED_CODE: i32 = 121;

/// Error code reported for a `$`-prefixed field name in an update
pub const DOLLAR_PREFIXED_FIELD_CODE: i32 = 52;

/// Store errors
///
/// MANIFESTO ALIGNMENT: All error paths are explicit. No silent failures.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    /// Some operations of an unordered batch failed; the others were applied
    #[error("Bulk write failed with {} write error(s)", .result.write_errors.len())]
    BulkWrite { result: BulkWriteResult },

    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// True for the partial-write class (some operations of a batch succeeded)
    pub fn is_partial_write(&self) -> bool {
        matches!(self, StoreError::BulkWrite { .. })
    }

    /// True if the error reports a missing collection
    pub fn is_collection_not_found(&self) -> bool {
        matches!(self, StoreError::CollectionNotFound(_))
    }
}
