//! Per-plugin metadata: enabled flag, display order, user variables
//!
//! Preferences are keyed by plugin display name, so they survive an
//! uninstall followed by a reinstall under a new identity. Source origins are
//! keyed by identity digest, since they describe one persisted source.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use super::DbPool;
use crate::plugins::SourceOrigin;
use crate::{Error, Result};

/// Repository for plugin metadata
#[derive(Clone)]
pub struct PluginMetaRepo {
    pool: DbPool,
}

impl PluginMetaRepo {
    /// Create a new metadata repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Whether the plugin is enabled (no record means enabled)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT enabled FROM plugin_enabled WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get::<_, bool>(0),
        );

        match result {
            Ok(enabled) => Ok(enabled),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(true),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// Set the enabled flag
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO plugin_enabled (name, enabled) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET enabled = excluded.enabled
            ",
            rusqlite::params![name, enabled],
        )?;

        tracing::debug!(plugin = %name, enabled, "plugin enabled flag updated");
        Ok(())
    }

    /// Names of all explicitly disabled plugins
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn disabled_names(&self) -> Result<HashSet<String>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare("SELECT name FROM plugin_enabled WHERE enabled = 0")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;

        Ok(names)
    }

    /// Display position, if one was set
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn order(&self, name: &str) -> Result<Option<i64>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT position FROM plugin_order WHERE name = ?1",
            rusqlite::params![name],
            |row| row.get::<_, i64>(0),
        );

        match result {
            Ok(position) => Ok(Some(position)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Database(e.to_string())),
        }
    }

    /// Set the display position (lower sorts first)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_order(&self, name: &str, position: i64) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO plugin_order (name, position) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET position = excluded.position
            ",
            rusqlite::params![name, position],
        )?;

        Ok(())
    }

    /// All stored display positions
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn order_map(&self) -> Result<HashMap<String, i64>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare("SELECT name, position FROM plugin_order")?;
        let map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(map)
    }

    /// Assign positions `0..n` following the given name sequence
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn reorder(&self, names: &[String]) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction()?;

        for (position, name) in (0_i64..).zip(names) {
            tx.execute(
                r"
                INSERT INTO plugin_order (name, position) VALUES (?1, ?2)
                ON CONFLICT(name) DO UPDATE SET position = excluded.position
                ",
                rusqlite::params![name, position],
            )?;
        }

        tx.commit()?;
        tracing::debug!(count = names.len(), "plugin order updated");
        Ok(())
    }

    /// Stored user variables
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn user_variables(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare("SELECT key, value FROM plugin_variables WHERE name = ?1")?;
        let vars = stmt
            .query_map(rusqlite::params![name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

        Ok(vars)
    }

    /// Set one user variable
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_user_variable(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            r"
            INSERT INTO plugin_variables (name, key, value) VALUES (?1, ?2, ?3)
            ON CONFLICT(name, key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            ",
            rusqlite::params![name, key, value],
        )?;

        Ok(())
    }

    /// Remember where a persisted source came from
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn record_origin(&self, digest: &str, origin: &SourceOrigin) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let (kind, location) = match origin {
            SourceOrigin::File(path) => ("file", Some(path.to_string_lossy().into_owned())),
            SourceOrigin::Url(url) => ("url", Some(url.clone())),
            SourceOrigin::Inline => ("inline", None),
            SourceOrigin::Builtin => ("builtin", None),
        };

        conn.execute(
            r"
            INSERT INTO plugin_sources (digest, kind, location) VALUES (?1, ?2, ?3)
            ON CONFLICT(digest) DO UPDATE SET
                kind = excluded.kind,
                location = excluded.location,
                installed_at = datetime('now')
            ",
            rusqlite::params![digest, kind, location],
        )?;

        Ok(())
    }

    /// Recorded origin of a persisted source
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn origin(&self, digest: &str) -> Result<Option<SourceOrigin>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let row = conn.query_row(
            "SELECT kind, location FROM plugin_sources WHERE digest = ?1",
            rusqlite::params![digest],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        );

        let (kind, location) = match row {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(match (kind.as_str(), location) {
            ("file", Some(path)) => Some(SourceOrigin::File(PathBuf::from(path))),
            ("url", Some(url)) => Some(SourceOrigin::Url(url)),
            ("inline", _) => Some(SourceOrigin::Inline),
            ("builtin", _) => Some(SourceOrigin::Builtin),
            (other, _) => {
                tracing::warn!(hash = %digest, kind = other, "unrecognized source origin");
                None
            }
        })
    }

    /// Drop the recorded origin of a source
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn forget_origin(&self, digest: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM plugin_sources WHERE digest = ?1",
            rusqlite::params![digest],
        )?;
        Ok(())
    }

    /// Delete every record stored for a plugin
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn forget(&self, name: &str) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM plugin_enabled WHERE name = ?1", rusqlite::params![name])?;
        tx.execute("DELETE FROM plugin_order WHERE name = ?1", rusqlite::params![name])?;
        tx.execute("DELETE FROM plugin_variables WHERE name = ?1", rusqlite::params![name])?;

        tx.commit()?;
        tracing::info!(plugin = %name, "plugin metadata purged");
        Ok(())
    }
}
