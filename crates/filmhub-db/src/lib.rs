//! Database layer for the Filmhub room hub.
//!
//! Provides a pooled SQLite connection (`r2d2` + `rusqlite`) and the embedded
//! schema migrations for users, movies, rooms, participants and chat
//! messages. All calls are blocking; async callers are expected to move them
//! onto the blocking thread pool.

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
