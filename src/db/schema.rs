//! Database schema and migrations

use rusqlite::Connection;

use crate::{Error, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Apply pending migrations, each inside its own transaction
///
/// # Errors
///
/// Returns error if a migration fails, or if the on-disk schema is newer
/// than this build understands (fail closed rather than corrupt).
pub fn init(conn: &mut Connection) -> Result<()> {
    let version = current_version(conn)?;

    if version > SCHEMA_VERSION {
        return Err(Error::Database(format!(
            "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    for pending in (version + 1)..=SCHEMA_VERSION {
        let tx = conn.transaction()?;
        match pending {
            1 => migrate_v1(&tx)?,
            2 => migrate_v2(&tx)?,
            3 => migrate_v3(&tx)?,
            _ => unreachable!("no migration registered for v{pending}"),
        }
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [pending],
        )?;
        tx.commit()?;
        tracing::info!(version = pending, "migrated schema");
    }

    Ok(())
}

/// Read the highest applied schema version, 0 for a fresh database
fn current_version(conn: &Connection) -> Result<i32> {
    let has_table: i32 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |row| row.get(0),
    )?;

    if has_table == 0 {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        -- Registered downstream targets
        CREATE TABLE IF NOT EXISTS targets (
            name TEXT PRIMARY KEY,
            base_url TEXT NOT NULL,
            phrases TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_targets_name
        ON targets(name COLLATE NOCASE);
        ",
    )?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Current state values
        CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            description TEXT
        );

        -- Append-only audit trail of state changes
        CREATE TABLE IF NOT EXISTS settings_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT NOT NULL,
            changed_at TEXT NOT NULL DEFAULT (datetime('now')),
            source TEXT,
            reason TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_settings_log_name
        ON settings_log(name, changed_at DESC);

        INSERT INTO settings (name, value, description)
        VALUES ('listen_mode', 'trigger',
                'Current listening mode: inactive, trigger, or active');

        INSERT INTO settings_log (name, old_value, new_value, source, reason)
        VALUES ('listen_mode', NULL, 'trigger', 'migration', 'initial setup');
        ",
    )?;

    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Runtime-configurable capture settings
        INSERT INTO settings (name, value, description)
        VALUES ('enable_preroll_buffer', 'false',
                'Keep a rolling pre-roll buffer and prepend it to recordings');

        INSERT INTO settings (name, value, description)
        VALUES ('preroll_buffer_seconds', '2.0',
                'Seconds of audio retained in the pre-roll buffer (0.5-10)');
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_schema_init() {
        let mut conn = setup_test_conn();
        init(&mut conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='targets'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_idempotent() {
        let mut conn = setup_test_conn();
        init(&mut conn).unwrap();
        init(&mut conn).unwrap(); // Should not fail
    }

    #[test]
    fn test_seeds_default_listen_mode() {
        let mut conn = setup_test_conn();
        init(&mut conn).unwrap();

        let mode: String = conn
            .query_row(
                "SELECT value FROM settings WHERE name = 'listen_mode'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(mode, "trigger");
    }

    #[test]
    fn test_rejects_future_schema() {
        let mut conn = setup_test_conn();
        init(&mut conn).unwrap();

        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [SCHEMA_VERSION + 1],
        )
        .unwrap();

        assert!(init(&mut conn).is_err());
    }
}
