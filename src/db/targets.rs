//! Target table access

use serde::{Deserialize, Serialize};

use super::DbPool;
use crate::{Error, Result};

/// A registered downstream service ("brain")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique name, stored lowercase, matched case-insensitively
    pub name: String,
    /// Base URL; events are posted to `{base_url}/listen`
    pub base_url: String,
    /// Normalized wake phrases, in registration order
    pub phrases: Vec<String>,
}

impl Target {
    /// The endpoint routed events are delivered to
    #[must_use]
    pub fn listen_url(&self) -> String {
        format!("{}/listen", self.base_url.trim_end_matches('/'))
    }
}

/// CRUD over the targets table
#[derive(Clone)]
pub struct TargetRepo {
    db: DbPool,
}

impl TargetRepo {
    #[must_use]
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Insert or replace a target
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn upsert(&self, target: &Target) -> Result<()> {
        let phrases_json = serde_json::to_string(&target.phrases)?;
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO targets (name, base_url, phrases)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                 base_url = excluded.base_url,
                 phrases = excluded.phrases",
            rusqlite::params![target.name.to_lowercase(), target.base_url, phrases_json],
        )?;
        Ok(())
    }

    /// Look up a target by name, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn get(&self, name: &str) -> Result<Option<Target>> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT name, base_url, phrases FROM targets WHERE name = ?1 COLLATE NOCASE",
        )?;
        let mut rows = stmt.query_map([name.to_lowercase()], row_to_target)?;
        match rows.next().transpose()? {
            Some(row) => Ok(Some(parse_target(row)?)),
            None => Ok(None),
        }
    }

    /// List all targets, ordered by name
    ///
    /// # Errors
    ///
    /// Returns error if the query fails
    pub fn list(&self) -> Result<Vec<Target>> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let mut stmt =
            conn.prepare("SELECT name, base_url, phrases FROM targets ORDER BY name")?;
        let rows = stmt.query_map([], row_to_target)?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(parse_target(row?)?);
        }
        Ok(targets)
    }

    /// Delete a target; returns whether a row was removed
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    pub fn delete(&self, name: &str) -> Result<bool> {
        let conn = self.db.get().map_err(|e| Error::Database(e.to_string()))?;
        let removed = conn.execute(
            "DELETE FROM targets WHERE name = ?1 COLLATE NOCASE",
            [name.to_lowercase()],
        )?;
        Ok(removed > 0)
    }
}

/// Raw row before the phrase JSON is decoded
struct TargetRow {
    name: String,
    base_url: String,
    phrases_json: String,
}

fn row_to_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<TargetRow> {
    Ok(TargetRow {
        name: row.get(0)?,
        base_url: row.get(1)?,
        phrases_json: row.get(2)?,
    })
}

fn parse_target(row: TargetRow) -> Result<Target> {
    Ok(Target {
        name: row.name,
        base_url: row.base_url,
        phrases: serde_json::from_str(&row.phrases_json)?,
    })
}
