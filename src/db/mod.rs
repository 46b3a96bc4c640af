//! Embedded database for settings, audit log, and target registry

mod schema;
mod store;
mod targets;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use schema::SCHEMA_VERSION;
pub use store::{Setting, SettingChange, SettingsStore};
pub use targets::{Target, TargetRepo};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Open the database file and apply pending migrations
///
/// # Errors
///
/// Returns error if the database cannot be opened or migrated; this is a
/// startup failure.
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let mut conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    schema::init(&mut conn)?;

    tracing::info!(version = SCHEMA_VERSION, "database initialized");
    Ok(pool)
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if the database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let mut conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&mut conn)?;

    Ok(pool)
}
