//! Database connection used by the migration engine
//!
//! Wraps a single-connection sqlx `Any` pool together with the [`Dialect`]
//! that was resolved when it was opened.

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};

use crate::config::MigrationConfig;
use crate::dialect::Dialect;
use crate::error::{MigrationError, MigrationResult};

/// Connection handle owned by a migration engine
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: AnyPool,
    dialect: Dialect,
}

impl DatabaseConnection {
    /// Open a connection to `url` using the given dialect
    pub async fn connect(url: &str, dialect: Dialect) -> MigrationResult<Self> {
        install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(MigrationError::Connection)?;

        tracing::debug!(%dialect, "Connected to migration database");
        Ok(Self::from_pool(pool, dialect))
    }

    /// Open the connection described by a configuration
    pub async fn from_config(config: &MigrationConfig) -> MigrationResult<Self> {
        let dialect = config.resolve_dialect()?;
        Self::connect(&config.database_url, dialect).await
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: AnyPool, dialect: Dialect) -> Self {
        Self { pool, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Get the database pool
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Check out the pool's connection for one migration step.
    ///
    /// A step that is interrupted must hand the connection to [`Self::discard`]
    /// instead of dropping it, since the server may still be running its
    /// last statement.
    pub async fn acquire(&self) -> MigrationResult<PoolConnection<Any>> {
        self.pool.acquire().await.map_err(MigrationError::Connection)
    }

    /// Detach a connection from the pool so the next call opens a fresh one
    pub fn discard(&self, conn: PoolConnection<Any>) {
        drop(conn.detach());
        tracing::debug!("Discarded interrupted migration connection");
    }

    /// Begin a transaction on a pooled connection
    pub async fn begin(&self) -> MigrationResult<Transaction<'static, Any>> {
        self.pool.begin().await.map_err(MigrationError::Connection)
    }

    /// Execute `script` on `conn`, returning how many statements were sent.
    ///
    /// Scripts the dialect parser understands run statement by statement.
    /// Anything else (trigger bodies, procedural blocks) is sent whole as a
    /// single unprepared multi-statement batch.
    pub async fn execute_script(
        &self,
        conn: &mut AnyConnection,
        script: &str,
    ) -> Result<usize, sqlx::Error> {
        let Some(statements) = self.dialect.split_statements(script) else {
            tracing::debug!("Executing migration script as one batch");
            sqlx::raw_sql(script).execute(&mut *conn).await?;
            return Ok(1);
        };

        for statement in &statements {
            tracing::debug!(statement = %statement, "Executing migration statement");
            sqlx::query(statement).execute(&mut *conn).await?;
        }

        Ok(statements.len())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
