//! Schema migrations for the entitlement database.
//!
//! Migrations are embedded with [`include_str!`] and applied in version
//! order, each inside its own transaction. The `schema_version` table
//! records what has run, so calling [`run_migrations`] again is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{EntitlementError, Result};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "bundles, subscriptions, event log, notification queue, outbox",
        sql: include_str!("v001_schema.sql"),
    },
    Migration {
        version: 2,
        description: "reason column on the event log",
        sql: include_str!("v002_event_reason.sql"),
    },
];

/// Apply every migration newer than the recorded version.
///
/// Returns the number of migrations applied.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        apply_migration(conn, migration)?;
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "migrations complete");
    }
    Ok(applied)
}

/// Highest applied version, or 0.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_error(format!("failed to read schema_version: {e}")))
}

/// Latest version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn migration_error(message: String) -> EntitlementError {
    EntitlementError::Migration { message }
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| migration_error(format!("failed to create schema_version table: {e}")))
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(|e| {
        migration_error(format!(
            "failed to begin transaction for v{}: {e}",
            migration.version
        ))
    })?;

    tx.execute_batch(migration.sql).map_err(|e| {
        migration_error(format!(
            "migration v{} ({}) failed: {e}",
            migration.version, migration.description
        ))
    })?;

    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description)
             VALUES (?1, datetime('now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| {
            migration_error(format!(
                "failed to record v{} in schema_version: {e}",
                migration.version
            ))
        })?;

    tx.commit()
        .map_err(|e| migration_error(format!("failed to commit v{}: {e}", migration.version)))
}
