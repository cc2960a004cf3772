//! Error types for the migration system
//!
//! Discovery problems are recoverable and travel as [`DiscoveryError`] inside
//! the discovery report. Everything that stops an operation is a
//! [`MigrationError`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::definitions::MigrationDirection;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Reasons a file in the migrations directory was skipped during discovery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("numeric prefix '{prefix}' is not a positive migration id")]
    InvalidPrefix { prefix: String },

    #[error("file name has no migration name after the numeric prefix")]
    MissingSlug,

    #[error("rollback script has no matching forward script")]
    OrphanedBackward,

    #[error("file name is not valid UTF-8")]
    NonUtf8Name,
}

/// Fatal errors raised by the migration engine
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Failed to initialize migration ledger: {0}")]
    SchemaInit(#[source] sqlx::Error),

    #[error("Migration ledger error: {0}")]
    Ledger(#[source] sqlx::Error),

    #[error("Failed to execute migration {migration} ({direction}): {source}")]
    ScriptExecution {
        migration: String,
        direction: MigrationDirection,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to commit migration {migration}: {source}")]
    Transaction {
        migration: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Migration {migration} has no rollback script")]
    MissingRollbackScript { id: u32, migration: String },

    #[error("Migration {migration} was already applied by another process")]
    AlreadyApplied { migration: String },

    #[error("Migration {migration} was already rolled back by another process")]
    AlreadyRolledBack { migration: String },

    #[error("Duplicate migration id {id}: {} and {}", .first.display(), .second.display())]
    DuplicateMigrationId {
        id: u32,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Migration {migration} is pending but {last_applied} is already applied")]
    OutOfOrderMigration {
        migration: String,
        last_applied: String,
    },

    #[error("Reset halted after rolling back {} migration(s): {source}", .rolled_back.len())]
    ResetHalted {
        rolled_back: Vec<String>,
        #[source]
        source: Box<MigrationError>,
    },

    #[error("Migration {migration} was cancelled")]
    Cancelled { migration: String },

    #[error("Migration {migration} timed out after {}s", .timeout.as_secs())]
    StepTimeout { migration: String, timeout: Duration },

    #[error("Invalid migration name: {0}")]
    InvalidName(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl MigrationError {
    /// Whether the command layer may re-read status and carry on
    pub fn is_recoverable(&self) -> bool {
        match self {
            MigrationError::AlreadyApplied { .. } | MigrationError::AlreadyRolledBack { .. } => {
                true
            }
            MigrationError::ResetHalted { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }
}

/// True when a database error is a unique constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        let conflict = MigrationError::AlreadyApplied {
            migration: "0001_create_posts".to_string(),
        };
        assert!(conflict.is_recoverable());

        let missing = MigrationError::MissingRollbackScript {
            id: 1,
            migration: "0001_create_posts".to_string(),
        };
        assert!(!missing.is_recoverable());
        assert_eq!(
            missing.to_string(),
            "Migration 0001_create_posts has no rollback script"
        );
    }

    #[test]
    fn test_reset_halted_reports_progress() {
        let halted = MigrationError::ResetHalted {
            rolled_back: vec!["0003_create_tags".to_string()],
            source: Box::new(MigrationError::MissingRollbackScript {
                id: 2,
                migration: "0002_add_index".to_string(),
            }),
        };
        assert!(!halted.is_recoverable());
        assert_eq!(
            halted.to_string(),
            "Reset halted after rolling back 1 migration(s): Migration 0002_add_index has no rollback script"
        );
    }

    #[test]
    fn test_non_database_error_is_not_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
