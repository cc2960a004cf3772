//! Migration Ledger - Persistent record of applied migrations
//!
//! Owns the ledger table: bootstrap, reads, and the row writes that ride in
//! the same transaction as a migration's script.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::AnyConnection;
use sqlx::Row;

use crate::connection::DatabaseConnection;
use crate::definitions::{LedgerEntry, Migration};
use crate::dialect::Dialect;
use crate::error::{is_unique_violation, MigrationError, MigrationResult};

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Ledger table accessor
#[derive(Debug, Clone)]
pub struct MigrationLedger {
    table: String,
    dialect: Dialect,
}

impl MigrationLedger {
    pub fn new(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table and its index if they do not exist
    pub async fn ensure_schema(&self, db: &DatabaseConnection) -> MigrationResult<()> {
        let mut statements = vec![self.dialect.create_ledger_table_sql(&self.table)];
        statements.extend(self.dialect.create_ledger_index_sql(&self.table));

        for sql in statements {
            sqlx::query(&sql)
                .execute(db.pool())
                .await
                .map_err(MigrationError::SchemaInit)?;
        }

        tracing::debug!(table = %self.table, "Migration ledger ready");
        Ok(())
    }

    /// Applied migrations, ascending by id
    pub async fn get_applied(&self, db: &DatabaseConnection) -> MigrationResult<Vec<LedgerEntry>> {
        let sql = self.dialect.select_ledger_sql(&self.table);
        let rows = sqlx::query(&sql)
            .fetch_all(db.pool())
            .await
            .map_err(MigrationError::Ledger)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id").map_err(MigrationError::Ledger)?;
            let name: String = row.try_get("name").map_err(MigrationError::Ledger)?;
            let filename: String = row.try_get("filename").map_err(MigrationError::Ledger)?;
            let applied_at: String = row.try_get("applied_at").map_err(MigrationError::Ledger)?;

            let id = u32::try_from(id).map_err(|_| {
                MigrationError::Ledger(sqlx::Error::Decode(
                    format!("ledger id {} is out of range", id).into(),
                ))
            })?;

            entries.push(LedgerEntry {
                id,
                name,
                filename,
                applied_at: parse_timestamp(&applied_at)?,
            });
        }

        Ok(entries)
    }

    /// Insert the ledger row for `migration` inside the caller's transaction
    pub async fn record_applied(
        &self,
        conn: &mut AnyConnection,
        migration: &Migration,
    ) -> MigrationResult<()> {
        let sql = self.dialect.insert_ledger_sql(&self.table);
        sqlx::query(&sql)
            .bind(i64::from(migration.id))
            .bind(migration.version_name())
            .bind(migration.filename.clone())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MigrationError::AlreadyApplied {
                        migration: migration.version_name(),
                    }
                } else {
                    MigrationError::Ledger(e)
                }
            })?;
        Ok(())
    }

    /// Delete the ledger row for `entry` inside the caller's transaction
    pub async fn remove_applied(
        &self,
        conn: &mut AnyConnection,
        entry: &LedgerEntry,
    ) -> MigrationResult<()> {
        let sql = self.dialect.delete_ledger_sql(&self.table);
        let result = sqlx::query(&sql)
            .bind(i64::from(entry.id))
            .execute(&mut *conn)
            .await
            .map_err(MigrationError::Ledger)?;

        if result.rows_affected() == 0 {
            return Err(MigrationError::AlreadyRolledBack {
                migration: entry.name.clone(),
            });
        }
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> MigrationResult<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| {
            MigrationError::Ledger(sqlx::Error::Decode(
                format!("unrecognized applied_at timestamp '{}'", value).into(),
            ))
        })
}
