//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "create_users_table",
    sql: include_str!("sql/001_create_users.sql"),
}];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
