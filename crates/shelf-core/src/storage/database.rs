//! Database connection handling
//!
//! Opens the SQLite database in durable (on-disk) or ephemeral (in-memory)
//! mode. In-memory databases discard all state when dropped, which is the
//! bootstrap mode used for tests and previews.

use std::path::Path;

use rusqlite::Connection;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};

/// Open (or create) the durable database at the given path
pub fn open_file(path: &Path) -> StorageResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Open an ephemeral in-memory database
pub fn open_memory() -> StorageResult<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    if needs_init(conn) {
        init_schema(conn)?;
    }

    Ok(())
}
