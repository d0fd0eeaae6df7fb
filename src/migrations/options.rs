//! # Migration Options
//!
//! Tunables of a bulk migration, loadable from a JSON file with camelCase keys.
//! Every field is optional; missing fields take their defaults.

use super::errors::{MigrationError, MigrationResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default number of operations per batch
pub const DEFAULT_MAX_BULK_SIZE: usize = 5000;

/// Default number of per-document update calls in flight
pub const DEFAULT_MAX_CONCURRENT_UPDATE_CALLS: usize = 10;

/// Default count duration after which a warning is logged
pub const DEFAULT_COUNT_WARNING_THRESHOLD_MS: u64 = 30_000;

/// Options of a [`BulkDataMigration`](super::BulkDataMigration)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOptions {
    /// Switch validation off while rolling back
    #[serde(default)]
    pub bypass_rollback_validation: bool,

    /// Switch validation off while updating
    #[serde(default)]
    pub bypass_update_validation: bool,

    /// Keep going when a batch partially fails, collecting its write errors
    #[serde(default)]
    pub continue_on_bulk_write_error: bool,

    /// Skip the up-front count; progress is then unknown
    #[serde(default)]
    pub dont_count: bool,

    /// Operations per batch
    #[serde(default = "default_max_bulk_size")]
    pub max_bulk_size: usize,

    /// Per-document update calls evaluated concurrently
    #[serde(default = "default_max_concurrent_update_calls")]
    pub max_concurrent_update_calls: usize,

    /// Capture backups so the migration can be rolled back
    #[serde(default = "default_true")]
    pub rollbackable: bool,

    /// Dotted paths to back up instead of the whole document
    #[serde(default)]
    pub projection_backup_filter: Option<Vec<String>>,

    /// Pause after each batch, in milliseconds
    #[serde(default)]
    pub throttle_ms: u64,

    /// Count duration after which a warning is logged, in milliseconds
    #[serde(default = "default_count_warning_threshold_ms")]
    pub count_warning_threshold_ms: u64,

    /// Keep inserted and upserted ids in results
    #[serde(default)]
    pub collect_ids: bool,

    /// Recreate documents deleted between migration and rollback
    #[serde(default = "default_true")]
    pub upsert_on_rollback: bool,
}

fn default_max_bulk_size() -> usize {
    DEFAULT_MAX_BULK_SIZE
}

fn default_max_concurrent_update_calls() -> usize {
    DEFAULT_MAX_CONCURRENT_UPDATE_CALLS
}

fn default_count_warning_threshold_ms() -> u64 {
    DEFAULT_COUNT_WARNING_THRESHOLD_MS
}

fn default_true() -> bool {
    true
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            bypass_rollback_validation: false,
            bypass_update_validation: false,
            continue_on_bulk_write_error: false,
            dont_count: false,
            max_bulk_size: default_max_bulk_size(),
            max_concurrent_update_calls: default_max_concurrent_update_calls(),
            rollbackable: true,
            projection_backup_filter: None,
            throttle_ms: 0,
            count_warning_threshold_ms: default_count_warning_threshold_ms(),
            collect_ids: false,
            upsert_on_rollback: true,
        }
    }
}

impl MigrationOptions {
    /// Load and validate options from a JSON file
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| MigrationError::Config {
            path: path.to_path_buf(),
            reason: format!("Failed to read options: {}", e),
        })?;

        let options: MigrationOptions =
            serde_json::from_str(&content).map_err(|e| MigrationError::Config {
                path: path.to_path_buf(),
                reason: format!("Invalid options JSON: {}", e),
            })?;

        options.validate()?;

        Ok(options)
    }

    /// Reject values the orchestrators cannot run with
    pub fn validate(&self) -> MigrationResult<()> {
        if self.max_bulk_size == 0 {
            return Err(MigrationError::InvalidOptions {
                field: "maxBulkSize",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.max_concurrent_update_calls == 0 {
            return Err(MigrationError::InvalidOptions {
                field: "maxConcurrentUpdateCalls",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
