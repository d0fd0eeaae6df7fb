//! # Migration Errors
//!
//! MANIFESTO ALIGNMENT: All error paths are explicit.

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Migration error types
///
/// MANIFESTO ALIGNMENT: Every error is explicit with actionable context.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Failure reported by the document store, including partial bulk writes
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid option '{field}': {reason}")]
    InvalidOptions { field: &'static str, reason: String },

    #[error("Failed to load migration options from {path:?}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Document has no _id field")]
    MissingDocumentId,

    #[error("Invalid backup record: {reason}")]
    InvalidBackupRecord { reason: String },

    /// The recorded update spec of a backup cannot be parsed back
    #[error("Unreadable recorded update spec {text}: {reason}")]
    ReplayFormat { text: String, reason: String },

    /// A user update or rollback callback failed
    #[error("Transform failed: {reason}")]
    Transform { reason: String },
}

impl MigrationError {
    /// True for a bulk write where some operations succeeded and others failed
    pub fn is_partial_write(&self) -> bool {
        matches!(self, MigrationError::Store(err) if err.is_partial_write())
    }
}
