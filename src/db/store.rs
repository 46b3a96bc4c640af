//! Cache-backed settings store with an append-only change log
//!
//! Reads come from an in-memory cache after warmup; every write updates the
//! database, the audit log, and the cache inside one critical section.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use super::DbPool;
use crate::{Error, Result};

/// Cap on audit log rows returned by a single history query
const HISTORY_LIMIT_MAX: usize = 500;

/// A single named setting with metadata
#[derive(Debug, Clone, Serialize)]
pub struct Setting {
    pub name: String,
    pub value: String,
    pub updated_at: String,
    pub description: Option<String>,
}

/// One logged setting change
#[derive(Debug, Clone, Serialize)]
pub struct SettingChange {
    pub id: i64,
    pub name: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub changed_at: String,
    pub source: Option<String>,
    pub reason: Option<String>,
}

/// Settings store backed by the embedded database
pub struct SettingsStore {
    db: DbPool,
    /// `None` until the first read warms it from disk
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl SettingsStore {
    #[must_use]
    pub fn new(db: DbPool) -> Self {
        Self {
            db,
            cache: Mutex::new(None),
        }
    }

    /// Set a value and append an audit log row, atomically
    ///
    /// Writing the value a setting already holds is a no-op: no row is
    /// updated and no log entry appended.
    ///
    /// # Errors
    ///
    /// Returns error if the database write fails
    pub fn set(
        &self,
        name: &str,
        value: &str,
        source: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut guard = self.lock_cache()?;
        let cache = self.warm(&mut guard)?;

        let old_value = cache.get(name).cloned();
        if old_value.as_deref() == Some(value) {
            return Ok(());
        }

        let mut conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO settings (name, value, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(name) DO UPDATE SET
                 value = excluded.value,
                 updated_at = excluded.updated_at",
            rusqlite::params![name, value],
        )?;
        tx.execute(
            "INSERT INTO settings_log (name, old_value, new_value, changed_at, source, reason)
             VALUES (?1, ?2, ?3, datetime('now'), ?4, ?5)",
            rusqlite::params![name, old_value, value, source, reason],
        )?;
        tx.commit()?;

        cache.insert(name.to_string(), value.to_string());

        tracing::debug!(name, value, source, "setting changed");
        Ok(())
    }

    /// Read a value from the cache (warmed from disk on first access)
    ///
    /// # Errors
    ///
    /// Returns error if the warmup read fails
    pub fn get_value(&self, name: &str) -> Result<Option<String>> {
        let mut guard = self.lock_cache()?;
        let cache = self.warm(&mut guard)?;
        Ok(cache.get(name).cloned())
    }

    /// Read a full setting row, including metadata
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn get(&self, name: &str) -> Result<Option<Setting>> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT name, value, updated_at, description FROM settings WHERE name = ?1",
        )?;
        let mut rows = stmt.query_map([name], row_to_setting)?;
        rows.next().transpose().map_err(Error::from)
    }

    /// List every setting, ordered by name
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn all_settings(&self) -> Result<Vec<Setting>> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT name, value, updated_at, description FROM settings ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_setting)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Read the change log, newest first, optionally filtered by name
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn history(&self, name: Option<&str>, limit: usize) -> Result<Vec<SettingChange>> {
        let limit = limit.min(HISTORY_LIMIT_MAX);
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;

        let rows = if let Some(name) = name {
            let mut stmt = conn.prepare(
                "SELECT id, name, old_value, new_value, changed_at, source, reason
                 FROM settings_log
                 WHERE name = ?1
                 ORDER BY changed_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let mapped =
                stmt.query_map(rusqlite::params![name, limit as i64], row_to_change)?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, name, old_value, new_value, changed_at, source, reason
                 FROM settings_log
                 ORDER BY changed_at DESC, id DESC
                 LIMIT ?1",
            )?;
            let mapped = stmt.query_map([limit as i64], row_to_change)?;
            mapped.collect::<std::result::Result<Vec<_>, _>>()?
        };

        Ok(rows)
    }

    /// Snapshot of all cached values
    ///
    /// # Errors
    ///
    /// Returns error if the warmup read fails
    pub fn cached_snapshot(&self) -> Result<HashMap<String, String>> {
        let mut guard = self.lock_cache()?;
        Ok(self.warm(&mut guard)?.clone())
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, Option<HashMap<String, String>>>> {
        self.cache
            .lock()
            .map_err(|_| Error::Database("settings cache lock poisoned".to_string()))
    }

    fn warm<'a>(
        &self,
        guard: &'a mut Option<HashMap<String, String>>,
    ) -> Result<&'a mut HashMap<String, String>> {
        let map = match guard.take() {
            Some(map) => map,
            None => {
                let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
                let mut stmt = conn.prepare("SELECT name, value FROM settings")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
                let map =
                    rows.collect::<std::result::Result<HashMap<String, String>, _>>()?;
                tracing::debug!(entries = map.len(), "settings cache warmed");
                map
            }
        };

        Ok(guard.insert(map))
    }
}

fn row_to_setting(row: &rusqlite::Row<'_>) -> rusqlite::Result<Setting> {
    Ok(Setting {
        name: row.get(0)?,
        value: row.get(1)?,
        updated_at: row.get(2)?,
        description: row.get(3)?,
    })
}

fn row_to_change(row: &rusqlite::Row<'_>) -> rusqlite::Result<SettingChange> {
    Ok(SettingChange {
        id: row.get(0)?,
        name: row.get(1)?,
        old_value: row.get(2)?,
        new_value: row.get(3)?,
        changed_at: row.get(4)?,
        source: row.get(5)?,
        reason: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup_store() -> SettingsStore {
        SettingsStore::new(db::init_memory().unwrap())
    }

    #[test]
    fn test_set_and_get() {
        let store = setup_store();
        store.set("listen_mode", "active", "test", None).unwrap();
        assert_eq!(
            store.get_value("listen_mode").unwrap().as_deref(),
            Some("active")
        );
    }

    #[test]
    fn test_every_write_logged() {
        let store = setup_store();
        store.set("listen_mode", "active", "test", Some("a")).unwrap();
        store.set("listen_mode", "trigger", "test", Some("b")).unwrap();

        let history = store.history(Some("listen_mode"), 10).unwrap();
        // Two writes plus the migration seed row
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].new_value, "trigger");
        assert_eq!(history[0].old_value.as_deref(), Some("active"));
        assert_eq!(history[1].new_value, "active");
    }

    #[test]
    fn test_log_ids_monotonic() {
        let store = setup_store();
        for mode in ["active", "trigger", "inactive", "trigger"] {
            store.set("listen_mode", mode, "test", None).unwrap();
        }

        let history = store.history(Some("listen_mode"), 100).unwrap();
        for pair in history.windows(2) {
            assert!(pair[0].id > pair[1].id, "history must be newest-first");
        }
    }

    #[test]
    fn test_unchanged_value_is_noop() {
        let store = setup_store();
        store.set("listen_mode", "active", "test", None).unwrap();
        let before = store.history(Some("listen_mode"), 100).unwrap().len();

        store.set("listen_mode", "active", "test", None).unwrap();
        let after = store.history(Some("listen_mode"), 100).unwrap().len();
        assert_eq!(before, after);
    }

    #[test]
    fn test_history_limit_capped() {
        let store = setup_store();
        let changes = store.history(None, 10_000).unwrap();
        assert!(changes.len() <= HISTORY_LIMIT_MAX);
    }

    #[test]
    fn test_migration_seeds_defaults() {
        let store = setup_store();
        assert_eq!(
            store.get_value("listen_mode").unwrap().as_deref(),
            Some("trigger")
        );
        assert_eq!(
            store.get_value("enable_preroll_buffer").unwrap().as_deref(),
            Some("false")
        );
    }
}
