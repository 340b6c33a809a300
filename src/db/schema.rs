//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Enabled flag per plugin name (absent = enabled)
        CREATE TABLE IF NOT EXISTS plugin_enabled (
            name TEXT PRIMARY KEY,
            enabled INTEGER NOT NULL DEFAULT 1
        );

        -- Display order per plugin name (absent = last)
        CREATE TABLE IF NOT EXISTS plugin_order (
            name TEXT PRIMARY KEY,
            position INTEGER NOT NULL
        );

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1 (plugin enabled/order)");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Free-form user variables per plugin name
        CREATE TABLE IF NOT EXISTS plugin_variables (
            name TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (name, key)
        );

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2 (plugin user variables)");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Where each persisted source was installed from, keyed by digest
        CREATE TABLE IF NOT EXISTS plugin_sources (
            digest TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            location TEXT,
            installed_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::info!("migrated to schema v3 (plugin source origins)");
    Ok(())
}
