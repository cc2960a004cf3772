use elif_migrations::{
    MigrationConfig, MigrationEngine, MigrationError, MigrationGenerator, MigrationKind,
    MigrationSource, MigrationStatus,
};
use tokio_util::sync::CancellationToken;

/// Connect, bootstrap the ledger and attach the interrupt token
pub async fn open_engine(
    config: &MigrationConfig,
    cancellation: CancellationToken,
) -> anyhow::Result<MigrationEngine> {
    let engine = MigrationEngine::connect(config)
        .await?
        .with_cancellation(cancellation);
    engine.initialize().await?;
    Ok(engine)
}

pub fn create(config: &MigrationConfig, name: &str, kind: MigrationKind) -> anyhow::Result<()> {
    let source = MigrationSource::new(&config.migrations_dir, &config.extension);
    let generator = MigrationGenerator::new(source, config.resolve_dialect()?);
    let generated = generator.generate(name, &kind)?;

    println!("Created migration: {}", generated.up_path.display());
    println!("Created rollback:  {}", generated.down_path.display());
    Ok(())
}

pub async fn run(engine: &MigrationEngine) -> anyhow::Result<()> {
    let result = engine.apply().await?;

    if result.applied_count == 0 && result.concurrently_applied.is_empty() {
        println!("Nothing to migrate");
        return Ok(());
    }

    for name in &result.applied_migrations {
        println!("  ✅ {}", name);
    }
    for name in &result.concurrently_applied {
        println!("  ↷ {} (applied by another process)", name);
    }
    println!(
        "Applied {} migration(s) in {}ms",
        result.applied_count, result.execution_time_ms
    );
    Ok(())
}

pub async fn rollback(engine: &MigrationEngine) -> anyhow::Result<()> {
    let result = engine.rollback().await?;

    match result.rolled_back_migrations.first() {
        Some(name) => println!("Rolled back: {} ({}ms)", name, result.execution_time_ms),
        None => println!("Nothing to roll back"),
    }
    Ok(())
}

pub async fn reset(engine: &MigrationEngine) -> anyhow::Result<()> {
    let result = match engine.reset().await {
        Ok(result) => result,
        Err(err) => {
            if let MigrationError::ResetHalted { rolled_back, .. } = &err {
                print!("{}", render_rolled_back(rolled_back));
            }
            return Err(err.into());
        }
    };

    print!("{}", render_rolled_back(&result.rolled_back_migrations));
    println!(
        "Rolled back {} migration(s) in {}ms",
        result.rolled_back_count, result.execution_time_ms
    );
    Ok(())
}

pub async fn status(engine: &MigrationEngine, json: bool) -> anyhow::Result<()> {
    let status = engine.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(())
}

fn render_rolled_back(names: &[String]) -> String {
    names.iter().map(|name| format!("  ↩ {}\n", name)).collect()
}

fn render_status(status: &MigrationStatus) -> String {
    let mut out = String::from("Migration Status:\n================\n");

    if status.applied.is_empty() && status.pending.is_empty() {
        out.push_str("No migrations found\n");
    }
    for entry in &status.applied {
        out.push_str(&format!(
            "  ✅ {}  (applied {})\n",
            entry.name,
            entry.applied_at.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    for migration in &status.pending {
        let note = if migration.has_rollback() { "" } else { "  [no rollback]" };
        out.push_str(&format!("  ⏳ {}{}\n", migration.version_name(), note));
    }
    for skipped in &status.skipped {
        out.push_str(&format!(
            "  ⚠ {} skipped: {}\n",
            skipped.path.display(),
            skipped.reason
        ));
    }

    out.push_str(&format!(
        "\n{} applied, {} pending\n",
        status.applied.len(),
        status.pending.len()
    ));
    out
}
