mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use commands::migrate;
use elif_migrations::{MigrationConfig, MigrationEngine, MigrationKind};
use logging::{init_logging, LoggingConfig};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "elif-migrate")]
#[command(about = "Database schema migrations for elif.rs applications")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL (defaults to DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Directory containing migration files
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: MigrateCommands,
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Create a new migration
    Create {
        /// Migration name
        name: String,

        /// Template to use; inferred from the name when omitted
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        /// Table the migration works on
        #[arg(long)]
        table: Option<String>,

        /// Column to add (add-column)
        #[arg(long)]
        column: Option<String>,

        /// SQL type of the added column
        #[arg(long, default_value = "TEXT")]
        column_type: String,

        /// Indexed columns, comma separated (create-index)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },

    /// Run pending migrations
    Run,

    /// Rollback the last migration
    Rollback,

    /// Rollback every applied migration
    Reset,

    /// Show migration status
    Status {
        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    CreateTable,
    AddColumn,
    CreateIndex,
    Custom,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    init_logging(logging.with_json(cli.json_logs))?;

    let config = load_config(&cli)?;

    match cli.command {
        MigrateCommands::Create {
            name,
            kind,
            table,
            column,
            column_type,
            columns,
        } => {
            let kind = build_kind(&name, kind, table, column, column_type, columns)?;
            migrate::create(&config, &name, kind)
        }
        MigrateCommands::Run => {
            let engine = connect(&config).await?;
            let result = migrate::run(&engine).await;
            disconnect(engine, result).await
        }
        MigrateCommands::Rollback => {
            let engine = connect(&config).await?;
            let result = migrate::rollback(&engine).await;
            disconnect(engine, result).await
        }
        MigrateCommands::Reset => {
            let engine = connect(&config).await?;
            let result = migrate::reset(&engine).await;
            disconnect(engine, result).await
        }
        MigrateCommands::Status { json } => {
            let engine = connect(&config).await?;
            let result = migrate::status(&engine, json).await;
            disconnect(engine, result).await
        }
    }
}

/// Open the engine with Ctrl-C wired to its cancellation token
async fn connect(config: &MigrationConfig) -> anyhow::Result<MigrationEngine> {
    let cancellation = CancellationToken::new();
    let interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling current migration");
            interrupt.cancel();
        }
    });

    migrate::open_engine(config, cancellation).await
}

async fn disconnect(engine: MigrationEngine, result: anyhow::Result<()>) -> anyhow::Result<()> {
    engine.connection().close().await;
    result
}

fn load_config(cli: &Cli) -> anyhow::Result<MigrationConfig> {
    let mut config = match &cli.config {
        Some(path) => MigrationConfig::load(path)?,
        None => MigrationConfig::from_env(),
    };

    if let Some(url) = &cli.database_url {
        config.database_url = url.clone();
    } else if config.database_url.is_empty() {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_kind(
    name: &str,
    kind: Option<KindArg>,
    table: Option<String>,
    column: Option<String>,
    column_type: String,
    columns: Vec<String>,
) -> anyhow::Result<MigrationKind> {
    let Some(kind) = kind else {
        return Ok(MigrationKind::infer(name));
    };

    let require = |value: Option<String>, flag: &str| {
        value.ok_or_else(|| anyhow!("--{} is required for this kind of migration", flag))
    };

    Ok(match kind {
        KindArg::CreateTable => MigrationKind::CreateTable {
            table: require(table, "table")?,
        },
        KindArg::AddColumn => MigrationKind::AddColumn {
            table: require(table, "table")?,
            column: require(column, "column")?,
            column_type,
        },
        KindArg::CreateIndex => {
            if columns.is_empty() {
                bail!("--columns is required for create-index migrations");
            }
            MigrationKind::CreateIndex {
                table: require(table, "table")?,
                columns,
            }
        }
        KindArg::Custom => MigrationKind::Custom,
    })
}
