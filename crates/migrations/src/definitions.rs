//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system:
//! discovered migrations, ledger rows, the derived status view and the
//! results returned by apply/rollback.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DiscoveryError;

/// A migration discovered on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Migration {
    /// Positive id parsed from the numeric filename prefix
    pub id: u32,
    /// Slug parsed from the filename
    pub name: String,
    /// File name of the forward script, recorded in the ledger
    pub filename: String,
    /// Statements applied when moving forward
    pub forward_script: String,
    /// Statements applied when rolling back, if a `_down` file exists
    pub backward_script: Option<String>,
    pub forward_path: PathBuf,
    pub backward_path: Option<PathBuf>,
}

impl Migration {
    /// Ledger key for this migration, e.g. `0001_create_posts`
    pub fn version_name(&self) -> String {
        version_name(self.id, &self.name)
    }

    pub fn has_rollback(&self) -> bool {
        self.backward_script.is_some()
    }
}

pub(crate) fn version_name(id: u32, name: &str) -> String {
    format!("{:04}_{}", id, name)
}

/// A row of the migration ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Migration id
    pub id: u32,
    /// Version name of the applied migration
    pub name: String,
    /// Forward script file name at the time it was applied
    pub filename: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// A file that discovery ignored, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    #[serde(serialize_with = "serialize_reason")]
    pub reason: DiscoveryError,
}

fn serialize_reason<S: serde::Serializer>(
    reason: &DiscoveryError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(reason)
}

/// Output of a directory scan
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Catalog, ascending by id
    pub migrations: Vec<Migration>,
    pub skipped: Vec<SkippedFile>,
}

/// Applied/pending view computed from the catalog and the ledger
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationStatus {
    /// Ledger entries, ascending by id
    pub applied: Vec<LedgerEntry>,
    /// Catalog entries without a ledger row, ascending by id
    pub pending: Vec<Migration>,
    /// Highest-id ledger entry
    pub last_applied: Option<LedgerEntry>,
    pub skipped: Vec<SkippedFile>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of running migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationRunResult {
    /// Number of migrations that were applied
    pub applied_count: usize,
    /// Version names of migrations that were applied
    pub applied_migrations: Vec<String>,
    /// Number of migrations already applied before this run
    pub skipped_count: usize,
    /// Migrations another process applied while this run was in flight
    pub concurrently_applied: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackResult {
    /// Number of migrations that were rolled back
    pub rolled_back_count: usize,
    /// Version names of migrations that were rolled back, in order
    pub rolled_back_migrations: Vec<String>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationDirection {
    /// Apply the migration (run forward script)
    Up,
    /// Rollback the migration (run backward script)
    Down,
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDirection::Up => write!(f, "up"),
            MigrationDirection::Down => write!(f, "down"),
        }
    }
}

/// Files written by `generate_migration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedMigration {
    pub id: u32,
    pub name: String,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}
