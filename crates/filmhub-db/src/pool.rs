//! Connection pool creation.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// Runtime tunables for the SQLite pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout applied to every pooled connection, in milliseconds.
    pub busy_timeout_ms: u64,
    /// Upper bound on pooled connections. This also bounds how many storage
    /// calls the hub can have in flight at once.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Opens a pool over the SQLite file at `db_path` in WAL mode with foreign
/// keys enforced.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. `:memory:` gives every
///   pooled connection its own private database, so anything sharing state
///   across connections (tests included) should point at a real file.
/// * `settings` - Busy timeout and pool size applied to every connection.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the pool cannot be built or a connection
/// fails its initial pragmas.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let busy_timeout_ms = settings.busy_timeout_ms;
    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                tracing::warn!(journal_mode = %journal_mode, "sqlite refused WAL journal mode");
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {busy_timeout_ms};"
            ))
        });

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        pool_max_size = settings.pool_max_size,
        "database pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_applies_pragmas() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 1_500,
            pool_max_size: 2,
        };
        let pool = create_pool(file.path().to_str().unwrap(), settings).expect("pool");
        let conn = pool.get().expect("connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);

        let busy: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(busy, 1_500);
        assert_eq!(pool.max_size(), 2);
    }
}
