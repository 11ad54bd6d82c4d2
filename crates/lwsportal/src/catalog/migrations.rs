//! Catalog schema migrations.
//!
//! Applied migrations are tracked in `_migrations`; pending ones run in
//! version order, each at most once.

use rusqlite::Connection;

use super::CatalogError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create_functions_table",
    sql: include_str!("sql/001_create_functions.sql"),
}];

/// Applies every migration newer than the recorded schema version.
///
/// Each migration and its bookkeeping row commit in one transaction, so an
/// interrupted run never leaves a half-applied version behind.
pub(crate) fn run_all(conn: &Connection) -> Result<(), CatalogError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);
    for migration in pending {
        log::info!(
            "Applying catalog schema v{} ({})",
            migration.version,
            migration.description
        );
        apply(conn, migration).map_err(|e| CatalogError::Migration {
            version: migration.version,
            reason: e.to_string(),
        })?;
    }

    Ok(())
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
        rusqlite::params![migration.version, migration.description],
    )?;
    tx.commit()
}
