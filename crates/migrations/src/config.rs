//! Configuration for the migration system

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialect::{is_valid_identifier, Dialect};
use crate::error::{MigrationError, MigrationResult};

/// Configuration for the migration system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Database connection URL, e.g. `postgres://localhost/app`
    pub database_url: String,
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for tracking migrations
    pub migrations_table: String,
    /// Extension of migration script files
    pub extension: String,
    /// Overrides the dialect detected from the URL scheme
    pub dialect: Option<Dialect>,
    /// Upper bound on a single migration step
    pub step_timeout_secs: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            migrations_dir: PathBuf::from("migrations"),
            migrations_table: "elif_migrations".to_string(),
            extension: "sql".to_string(),
            dialect: None,
            step_timeout_secs: None,
        }
    }
}

impl MigrationConfig {
    pub fn new(database_url: impl Into<String>, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            migrations_dir: migrations_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> MigrationResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `DATABASE_URL`, `MIGRATIONS_DIR` and `MIGRATIONS_TABLE`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(dir) = std::env::var("MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Ok(table) = std::env::var("MIGRATIONS_TABLE") {
            config.migrations_table = table;
        }
        config
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.migrations_table = table.into();
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    /// Validate values that end up interpolated into SQL or file names
    pub fn validate(&self) -> MigrationResult<()> {
        if !is_valid_identifier(&self.migrations_table) {
            return Err(MigrationError::Configuration(format!(
                "'{}' is not a valid migrations table name",
                self.migrations_table
            )));
        }

        if self.extension.is_empty()
            || !self.extension.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(MigrationError::Configuration(format!(
                "'{}' is not a valid migration file extension",
                self.extension
            )));
        }

        if self.step_timeout_secs == Some(0) {
            return Err(MigrationError::Configuration(
                "step_timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Dialect from the explicit setting, falling back to the URL scheme
    pub fn resolve_dialect(&self) -> MigrationResult<Dialect> {
        if let Some(dialect) = self.dialect {
            return Ok(dialect);
        }

        Dialect::from_url(&self.database_url).ok_or_else(|| {
            MigrationError::Configuration(format!(
                "cannot determine database dialect from '{}'; set `dialect` explicitly",
                self.database_url
            ))
        })
    }
}
