//! Migration commands.

use super::open_raw;
use evstore_core::MigrationManager;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Show current migration status.
pub fn status(db_path: &Path, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    info!("Checking migration status for {:?}", db_path);

    let raw = open_raw(db_path, timeout)?;
    let manager = MigrationManager::builtin();
    let current = manager.current_version(&raw.backend)?;
    let pending = manager.pending(current);

    println!("Migration Status");
    println!("================");
    println!("  Current version: {}", current);
    println!("  Latest version: {}", manager.latest_version());
    println!("  Pending migrations: {}", pending.len());

    Ok(())
}

/// List all registered migrations.
pub fn list(db_path: &Path, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    info!("Listing migrations for {:?}", db_path);

    let raw = open_raw(db_path, timeout)?;
    let manager = MigrationManager::builtin();
    let current = manager.current_version(&raw.backend)?;
    let migrations = manager.list();

    println!("Registered Migrations");
    println!("====================");

    if migrations.is_empty() {
        println!("  No migrations registered.");
    } else {
        for migration in &migrations {
            let status = if migration.version <= current {
                "✓ applied"
            } else {
                "○ pending"
            };

            println!("  v{}: {} [{}]", migration.version, migration.name, status);

            if let Some(desc) = &migration.description {
                println!("      {}", desc);
            }
        }
    }

    Ok(())
}

/// Run pending migrations.
pub fn run(db_path: &Path, timeout: Duration, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    info!("Running migrations for {:?}", db_path);

    let raw = open_raw(db_path, timeout)?;
    let manager = MigrationManager::builtin();
    manager.validate()?;
    let pending = manager.pending(manager.current_version(&raw.backend)?);

    if pending.is_empty() {
        println!("✓ No pending migrations to run.");
        return Ok(());
    }

    if dry_run {
        println!("Dry run - would apply {} migration(s):", pending.len());
        for migration in &pending {
            println!("  v{}: {}", migration.version, migration.name);
        }
        return Ok(());
    }

    println!("Running {} migration(s)...", pending.len());

    let result = manager.run_pending(&raw.backend)?;

    println!(
        "\n✓ Successfully applied {} migration(s)",
        result.applied_count()
    );
    for m in &result.migrations {
        println!("  v{}: {} ({} writes)", m.version, m.name, m.writes);
    }
    println!("  Final version: {}", result.final_version);

    Ok(())
}
