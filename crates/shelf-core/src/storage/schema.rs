//! SQLite schema for the record store
//!
//! One database holds everything: the entity tables, the many-to-many
//! membership junction, the append-only change log, tombstones for
//! propagating deletes, and sync bookkeeping.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Tags table
        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            created_at INTEGER NOT NULL,
            last_modified INTEGER NOT NULL
        );

        -- Resources table
        CREATE TABLE IF NOT EXISTS resources (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            last_modified INTEGER NOT NULL
        );

        -- Resource-tag junction table (many-to-many)
        CREATE TABLE IF NOT EXISTS resource_tags (
            resource_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            PRIMARY KEY (resource_id, tag_id),
            FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );

        -- Append-only ledger of local mutations. seq is the authoritative
        -- local order; rows are never updated, only pruned after sync ack.
        CREATE TABLE IF NOT EXISTS change_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            op TEXT NOT NULL,
            payload TEXT,
            ts INTEGER NOT NULL
        );

        -- Delete markers retained for a grace window so late-arriving
        -- remote updates to a deleted entity are recognized as stale.
        CREATE TABLE IF NOT EXISTS tombstones (
            entity_id TEXT PRIMARY KEY,
            entity_kind TEXT NOT NULL,
            deleted_at INTEGER NOT NULL
        );

        -- Sync bookkeeping: replica id, last acked sequence, remote cursor
        CREATE TABLE IF NOT EXISTS sync_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Indexes for common query patterns
        CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name);
        CREATE INDEX IF NOT EXISTS idx_resources_created_at ON resources(created_at);
        CREATE INDEX IF NOT EXISTS idx_resources_last_modified ON resources(last_modified);
        CREATE INDEX IF NOT EXISTS idx_resource_tags_tag_id ON resource_tags(tag_id);
        CREATE INDEX IF NOT EXISTS idx_change_log_entity ON change_log(entity_id);
        CREATE INDEX IF NOT EXISTS idx_tombstones_deleted_at ON tombstones(deleted_at);
        "#,
    )?;

    // Set schema version
    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
