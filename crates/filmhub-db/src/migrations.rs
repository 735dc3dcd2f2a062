//! Embedded schema migrations.
//!
//! Each migration is applied at most once, inside its own transaction, and
//! recorded in `_filmhub_migrations`.

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Applied in order; append new entries at the end.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_users",
        sql: include_str!("migrations/000_users.sql"),
    },
    Migration {
        name: "001_movies",
        sql: include_str!("migrations/001_movies.sql"),
    },
    Migration {
        name: "002_rooms",
        sql: include_str!("migrations/002_rooms.sql"),
    },
    Migration {
        name: "003_messages",
        sql: include_str!("migrations/003_messages.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Runs every pending migration and returns how many were applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn apply(conn: &Connection, migrations: &[Migration]) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _filmhub_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| MigrationError::ExecutionFailed {
        name: "_filmhub_migrations".to_string(),
        source,
    })?;

    let mut applied = 0;
    for migration in migrations {
        let done: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM _filmhub_migrations WHERE name = ?1)",
                [migration.name],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;
        if done {
            continue;
        }

        let failed = |source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        };

        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _filmhub_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        tracing::info!(migration = migration.name, "applied migration");
        applied += 1;
    }

    Ok(applied)
}
