//! Migration Engine - Executes migrations against the database
//!
//! Computes status by diffing the on-disk catalog against the ledger and
//! applies pending migrations one transaction at a time. Rollback and reset
//! live in [`crate::rollback`].

use std::collections::HashSet;
use std::time::{Duration, Instant};

use sqlx::{AnyConnection, Connection};
use tokio_util::sync::CancellationToken;

use crate::config::MigrationConfig;
use crate::connection::DatabaseConnection;
use crate::definitions::{
    GeneratedMigration, LedgerEntry, Migration, MigrationDirection, MigrationRunResult,
    MigrationStatus, SkippedFile,
};
use crate::error::{is_unique_violation, MigrationError, MigrationResult};
use crate::generator::{MigrationGenerator, MigrationKind};
use crate::ledger::MigrationLedger;
use crate::source::MigrationSource;

/// Catalog and ledger read together
pub(crate) struct Snapshot {
    pub catalog: Vec<Migration>,
    pub applied: Vec<LedgerEntry>,
    pub skipped: Vec<SkippedFile>,
}

impl Snapshot {
    fn into_status(self) -> MigrationStatus {
        let applied_ids: HashSet<u32> = self.applied.iter().map(|entry| entry.id).collect();
        let pending = self
            .catalog
            .into_iter()
            .filter(|migration| !applied_ids.contains(&migration.id))
            .collect();
        let last_applied = self.applied.iter().max_by_key(|entry| entry.id).cloned();

        MigrationStatus {
            applied: self.applied,
            pending,
            last_applied,
            skipped: self.skipped,
        }
    }
}

/// One transactional unit of work
pub(crate) enum Step<'a> {
    Apply(&'a Migration),
    Revert {
        entry: &'a LedgerEntry,
        script: &'a str,
    },
}

/// Migration engine bound to one database and one migrations directory
pub struct MigrationEngine {
    source: MigrationSource,
    ledger: MigrationLedger,
    connection: DatabaseConnection,
    step_timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl MigrationEngine {
    /// Create an engine over an already opened connection
    pub fn new(config: &MigrationConfig, connection: DatabaseConnection) -> MigrationResult<Self> {
        config.validate()?;

        Ok(Self {
            source: MigrationSource::new(&config.migrations_dir, &config.extension),
            ledger: MigrationLedger::new(&config.migrations_table, connection.dialect()),
            connection,
            step_timeout: config.step_timeout(),
            cancellation: CancellationToken::new(),
        })
    }

    /// Open the configured database and create an engine for it
    pub async fn connect(config: &MigrationConfig) -> MigrationResult<Self> {
        config.validate()?;
        let connection = DatabaseConnection::from_config(config).await?;
        Self::new(config, connection)
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Token that cancels the step in progress when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Bootstrap the ledger table; call once per process
    pub async fn initialize(&self) -> MigrationResult<()> {
        self.ledger.ensure_schema(&self.connection).await?;
        tracing::info!(
            table = %self.ledger.table(),
            dialect = %self.connection.dialect(),
            "Migration ledger initialized"
        );
        Ok(())
    }

    pub(crate) async fn snapshot(&self) -> MigrationResult<Snapshot> {
        let discovery = self.source.scan()?;
        let applied = self.ledger.get_applied(&self.connection).await?;

        Ok(Snapshot {
            catalog: discovery.migrations,
            applied,
            skipped: discovery.skipped,
        })
    }

    /// Applied and pending migrations, read fresh from disk and database
    pub async fn status(&self) -> MigrationResult<MigrationStatus> {
        Ok(self.snapshot().await?.into_status())
    }

    /// Run all pending migrations, one transaction each
    pub async fn apply(&self) -> MigrationResult<MigrationRunResult> {
        let start_time = Instant::now();
        let status = self.status().await?;
        check_order(&status)?;

        let skipped_count = status.applied.len();
        if status.pending.is_empty() {
            tracing::info!("Nothing to migrate");
            return Ok(MigrationRunResult {
                skipped_count,
                execution_time_ms: start_time.elapsed().as_millis(),
                ..MigrationRunResult::default()
            });
        }

        let mut applied_migrations = Vec::new();
        let mut concurrently_applied = Vec::new();

        for migration in &status.pending {
            let version = migration.version_name();
            tracing::info!(id = migration.id, name = %migration.name, "Applying migration {}", version);

            match self.guarded(&version, Step::Apply(migration)).await {
                Ok(()) => applied_migrations.push(version),
                Err(err @ MigrationError::ScriptExecution { .. })
                | Err(err @ MigrationError::Transaction { .. })
                | Err(err @ MigrationError::AlreadyApplied { .. }) => {
                    if !self.applied_elsewhere(migration).await? {
                        tracing::error!(id = migration.id, "Migration {} failed: {}", version, err);
                        return Err(err);
                    }
                    tracing::warn!(
                        id = migration.id,
                        "Migration {} was applied by another process, continuing",
                        version
                    );
                    concurrently_applied.push(version);
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(count = applied_migrations.len(), "Migrations applied");

        Ok(MigrationRunResult {
            applied_count: applied_migrations.len(),
            applied_migrations,
            skipped_count,
            concurrently_applied,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Write a new forward/backward migration pair
    pub fn generate_migration(
        &self,
        name: &str,
        kind: MigrationKind,
    ) -> MigrationResult<GeneratedMigration> {
        MigrationGenerator::new(self.source.clone(), self.connection.dialect()).generate(name, &kind)
    }

    async fn apply_step(
        &self,
        conn: &mut AnyConnection,
        migration: &Migration,
    ) -> MigrationResult<()> {
        let mut transaction = conn.begin().await.map_err(MigrationError::Connection)?;

        let statements = self
            .connection
            .execute_script(&mut *transaction, &migration.forward_script)
            .await
            .map_err(|source| MigrationError::ScriptExecution {
                migration: migration.version_name(),
                direction: MigrationDirection::Up,
                source,
            })?;

        self.ledger.record_applied(&mut *transaction, migration).await?;

        transaction
            .commit()
            .await
            .map_err(|source| commit_error(migration.version_name(), source))?;

        tracing::debug!(id = migration.id, statements, "Migration committed");
        Ok(())
    }

    /// Re-read status after a failed step to see whether someone else won the race
    async fn applied_elsewhere(&self, migration: &Migration) -> MigrationResult<bool> {
        let status = self.status().await?;
        Ok(status.applied.iter().any(|entry| entry.id == migration.id))
    }

    /// Run one step under the cancellation token and the step timeout.
    ///
    /// Interrupting a step drops its transaction, so nothing it did is
    /// committed. The statement in flight may keep running on the server, so
    /// the connection is detached from the pool and the next call connects
    /// afresh instead of queueing behind it.
    pub(crate) async fn guarded(&self, migration: &str, step: Step<'_>) -> MigrationResult<()> {
        if self.cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled {
                migration: migration.to_string(),
            });
        }

        let mut conn = self.connection.acquire().await?;

        let result = {
            let work = self.run_step(&mut conn, step);
            let bounded = async {
                match self.step_timeout {
                    Some(limit) => tokio::time::timeout(limit, work).await.unwrap_or_else(|_| {
                        Err(MigrationError::StepTimeout {
                            migration: migration.to_string(),
                            timeout: limit,
                        })
                    }),
                    None => work.await,
                }
            };

            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => Err(MigrationError::Cancelled {
                    migration: migration.to_string(),
                }),
                result = bounded => result,
            }
        };

        match &result {
            Err(MigrationError::Cancelled { .. }) => {
                tracing::warn!(migration, "Migration cancelled, transaction rolled back");
                self.connection.discard(conn);
            }
            Err(MigrationError::StepTimeout { timeout, .. }) => {
                tracing::warn!(migration, timeout_secs = timeout.as_secs(), "Migration timed out, transaction rolled back");
                self.connection.discard(conn);
            }
            _ => {}
        }

        result
    }

    async fn run_step(&self, conn: &mut AnyConnection, step: Step<'_>) -> MigrationResult<()> {
        match step {
            Step::Apply(migration) => self.apply_step(conn, migration).await,
            Step::Revert { entry, script } => self.revert_step(conn, entry, script).await,
        }
    }
}

pub(crate) fn commit_error(migration: String, source: sqlx::Error) -> MigrationError {
    if is_unique_violation(&source) {
        MigrationError::AlreadyApplied { migration }
    } else {
        MigrationError::Transaction { migration, source }
    }
}

fn check_order(status: &MigrationStatus) -> MigrationResult<()> {
    let Some(last) = &status.last_applied else {
        return Ok(());
    };

    match status.pending.iter().find(|migration| migration.id < last.id) {
        Some(early) => Err(MigrationError::OutOfOrderMigration {
            migration: early.version_name(),
            last_applied: last.name.clone(),
        }),
        None => Ok(()),
    }
}
