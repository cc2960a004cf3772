//! Migration Rollback - Handles rolling back applied migrations
//!
//! Rollback always targets the highest-id ledger entry and runs its backward
//! script in a single transaction. Reset repeats that step until the ledger
//! is empty, committing after every migration.

use std::time::Instant;

use sqlx::{AnyConnection, Connection};

use crate::definitions::{LedgerEntry, MigrationDirection, RollbackResult};
use crate::engine::{commit_error, MigrationEngine, Step};
use crate::error::{MigrationError, MigrationResult};

impl MigrationEngine {
    /// Roll back the most recently applied migration
    pub async fn rollback(&self) -> MigrationResult<RollbackResult> {
        let start_time = Instant::now();

        let rolled_back_migrations: Vec<String> = self.rollback_last().await?.into_iter().collect();
        if rolled_back_migrations.is_empty() {
            tracing::info!("Nothing to roll back");
        }

        Ok(RollbackResult {
            rolled_back_count: rolled_back_migrations.len(),
            rolled_back_migrations,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Roll back every applied migration, newest first.
    ///
    /// A failing step stops the reset with [`MigrationError::ResetHalted`],
    /// which carries the migrations that were already rolled back.
    pub async fn reset(&self) -> MigrationResult<RollbackResult> {
        let start_time = Instant::now();
        let mut rolled_back_migrations = Vec::new();

        loop {
            match self.rollback_last().await {
                Ok(Some(version)) => rolled_back_migrations.push(version),
                Ok(None) => break,
                Err(source) => {
                    tracing::error!(
                        count = rolled_back_migrations.len(),
                        "Reset halted after rolling back {:?}: {}",
                        rolled_back_migrations,
                        source
                    );
                    return Err(MigrationError::ResetHalted {
                        rolled_back: rolled_back_migrations,
                        source: Box::new(source),
                    });
                }
            }
        }

        tracing::info!(count = rolled_back_migrations.len(), "Reset complete");

        Ok(RollbackResult {
            rolled_back_count: rolled_back_migrations.len(),
            rolled_back_migrations,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Roll back the highest-id ledger entry, returning its version name
    async fn rollback_last(&self) -> MigrationResult<Option<String>> {
        let snapshot = self.snapshot().await?;
        let Some(entry) = snapshot.applied.iter().max_by_key(|entry| entry.id) else {
            return Ok(None);
        };

        let migration = snapshot.catalog.iter().find(|m| m.id == entry.id);
        let Some(script) = migration.and_then(|m| m.backward_script.as_deref()) else {
            return Err(MigrationError::MissingRollbackScript {
                id: entry.id,
                migration: entry.name.clone(),
            });
        };

        if let Some(migration) = migration.filter(|m| m.version_name() != entry.name) {
            tracing::warn!(
                id = entry.id,
                "Ledger records {} but the file on disk is {}",
                entry.name,
                migration.filename
            );
        }

        tracing::info!(id = entry.id, "Rolling back migration {}", entry.name);
        self.guarded(&entry.name, Step::Revert { entry, script })
            .await?;

        Ok(Some(entry.name.clone()))
    }

    pub(crate) async fn revert_step(
        &self,
        conn: &mut AnyConnection,
        entry: &LedgerEntry,
        script: &str,
    ) -> MigrationResult<()> {
        let mut transaction = conn.begin().await.map_err(MigrationError::Connection)?;

        let statements = self
            .connection()
            .execute_script(&mut *transaction, script)
            .await
            .map_err(|source| MigrationError::ScriptExecution {
                migration: entry.name.clone(),
                direction: MigrationDirection::Down,
                source,
            })?;

        self.ledger().remove_applied(&mut *transaction, entry).await?;

        transaction
            .commit()
            .await
            .map_err(|source| commit_error(entry.name.clone(), source))?;

        tracing::debug!(id = entry.id, statements, "Rollback committed");
        Ok(())
    }
}
