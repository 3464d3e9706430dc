//! Database connection management
//!
//! Opens the relational index's SQLite file with the pragmas the backend
//! relies on and bootstraps the schema idempotently.

use rusqlite::Connection;
use std::path::Path;
use crate::error::{Result, TagError};

/// Open (creating if needed) the index database at `db_path`
pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let db_dir = db_path.parent()
        .ok_or_else(|| TagError::Config(format!("Invalid database path: {}", db_path.display())))?;
    std::fs::create_dir_all(db_dir)?;

    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    init_schema(&conn)?;

    tracing::info!("[Connection] Opened index database: {}", db_path.display());
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", ON)?;
    init_schema(&conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    // Enable WAL mode for better concurrent access
    conn.pragma_update(None, "journal_mode", WAL)?;

    // Enable foreign key constraints
    conn.pragma_update(None, "foreign_keys", ON)?;

    conn.pragma_update(None, "synchronous", NORMAL)?;

    // A concurrent tagger holds the write lock briefly; wait rather than fail
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(())
}

/// Create the file / tag / file_tag tables if they don't exist yet
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS file (
            id INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            hash CHAR(40) NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS tag (
            id INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL UNIQUE
        );

        -- One row per link on disk: the display name travels with the association
        CREATE TABLE IF NOT EXISTS file_tag (
            file_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            name VARCHAR(255) NOT NULL,

            PRIMARY KEY (file_id, tag_id, name),
            FOREIGN KEY (file_id) REFERENCES file(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tag(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS ix_file_tag_tag ON file_tag(tag_id);
    "#)?;
    tracing::debug!("[Connection] Schema ready");
    Ok(())
}

// SQL pragma constants
const WAL: &str = "WAL";
const ON: &str = "ON";
const NORMAL: &str = "NORMAL";

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("db.sqlite");
        drop(open_connection(&db_path).unwrap());
        let conn = open_connection(&db_path).unwrap();

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('file', 'tag', 'file_tag')",
            [],
            |r| r.get(0),
        ).unwrap();
        assert_eq!(tables, 3);
    }

    #[test]
    fn test_hash_is_unique() {
        let conn = open_in_memory().unwrap();
        conn.execute("INSERT INTO file (name, hash) VALUES ('a', 'h')", []).unwrap();
        assert!(conn.execute("INSERT INTO file (name, hash) VALUES ('b', 'h')", []).is_err());
    }
}
