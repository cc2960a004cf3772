//! # elif-migrations: Schema migrations for elif.rs
//!
//! Discovers SQL migration files, tracks what has been applied in a ledger
//! table, and applies or reverses migrations one transaction at a time on
//! SQLite, PostgreSQL and MySQL.
//!
//! ```no_run
//! use elif_migrations::{MigrationConfig, MigrationEngine};
//!
//! # async fn run() -> elif_migrations::MigrationResult<()> {
//! let config = MigrationConfig::new("sqlite://app.db?mode=rwc", "migrations");
//! let engine = MigrationEngine::connect(&config).await?;
//! engine.initialize().await?;
//!
//! let result = engine.apply().await?;
//! println!("applied {} migration(s)", result.applied_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod definitions;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod generator;
pub mod ledger;
pub mod rollback;
pub mod schema_builder;
pub mod source;

pub use config::MigrationConfig;
pub use connection::DatabaseConnection;
pub use definitions::*;
pub use dialect::Dialect;
pub use engine::MigrationEngine;
pub use error::{DiscoveryError, MigrationError, MigrationResult};
pub use generator::{MigrationGenerator, MigrationKind};
pub use ledger::MigrationLedger;
pub use schema_builder::{SchemaBuilder, TableBuilder};
pub use source::MigrationSource;
