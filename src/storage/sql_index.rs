// FILE: src/storage/sql_index.rs
//! Relational Metadata Index.
//!
//! `file` holds one row per content hash, `tag` one per tag name, and
//! `file_tag` one per (file, tag, display name), mirroring the links on disk.
//! Every `ensure_*` is an `INSERT OR IGNORE`, so a racing writer inserting
//! the same hash is a success, never a duplicate row.

use super::connection;
use super::content_store::Link;
use super::index::{dedup_tags, FileEntry, MetadataIndex};
use crate::error::{Result, TagError};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct SqlIndex {
    conn: Mutex<Connection>,
}

impl SqlIndex {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self { conn: Mutex::new(connection::open_connection(db_path)?) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(connection::open_in_memory()?) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TagError::State("Poisoned lock".into()))
    }

    fn file_id(conn: &Connection, hash: &str) -> Result<Option<i64>> {
        Ok(conn
            .query_row("SELECT id FROM file WHERE hash = ?1", params![hash], |r| r.get(0))
            .optional()?)
    }

    fn tag_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
        Ok(conn
            .query_row("SELECT id FROM tag WHERE name = ?1", params![name], |r| r.get(0))
            .optional()?)
    }

    fn insert_tag(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("INSERT OR IGNORE INTO tag (name) VALUES (?1)", params![name])?;
        Ok(())
    }

    /// First writer's display name wins for the `file` row.
    fn insert_file(conn: &Connection, display_name: &str, hash: &str) -> Result<()> {
        conn.execute("INSERT OR IGNORE INTO file (name, hash) VALUES (?1, ?2)", params![display_name, hash])?;
        Ok(())
    }

    fn insert_association(conn: &Connection, hash: &str, display_name: &str, tag: &str) -> Result<bool> {
        let file_id = Self::file_id(conn, hash)?
            .ok_or_else(|| TagError::NotFound(format!("file {}", hash)))?;
        let tag_id = Self::tag_id(conn, tag)?
            .ok_or_else(|| TagError::NotFound(format!("tag {}", tag)))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO file_tag (file_id, tag_id, name) VALUES (?1, ?2, ?3)",
            params![file_id, tag_id, display_name],
        )?;
        Ok(inserted > 0)
    }

    /// Every association, shaped like the on-disk links.
    pub fn associations(&self) -> Result<Vec<Link>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.name, f.hash, ft.name FROM file_tag ft
             JOIN file f ON ft.file_id = f.id
             JOIN tag t ON ft.tag_id = t.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Link { tag: row.get(0)?, hash: row.get(1)?, display_name: row.get(2)? })
        })?;
        let mut links = Vec::new();
        for r in rows { links.push(r?); }
        links.sort();
        Ok(links)
    }
}

impl MetadataIndex for SqlIndex {
    fn backend_name(&self) -> &'static str {
        "sql"
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        Ok(Self::tag_id(&*self.lock()?, name)?.is_some())
    }

    fn ensure_tag(&self, name: &str) -> Result<()> {
        Self::insert_tag(&*self.lock()?, name)
    }

    fn all_tags(&self) -> Result<BTreeSet<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM tag")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut tags = BTreeSet::new();
        for r in rows { tags.insert(r?); }
        Ok(tags)
    }

    fn file_exists(&self, hash: &str) -> Result<bool> {
        Ok(Self::file_id(&*self.lock()?, hash)?.is_some())
    }

    fn ensure_file(&self, display_name: &str, hash: &str) -> Result<()> {
        Self::insert_file(&*self.lock()?, display_name, hash)
    }

    fn is_tagged(&self, hash: &str, tag: &str) -> Result<bool> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT 1 FROM file f
             JOIN file_tag ft ON f.id = ft.file_id
             JOIN tag t ON ft.tag_id = t.id
             WHERE f.hash = ?1 AND t.name = ?2
             LIMIT 1",
        )?;
        Ok(stmt.exists(params![hash, tag])?)
    }

    fn add_tag(&self, hash: &str, display_name: &str, tag: &str) -> Result<()> {
        if !Self::insert_association(&*self.lock()?, hash, display_name, tag)? {
            tracing::debug!("[SqlIndex] {} already tagged '{}'", hash, tag);
        }
        Ok(())
    }

    /// The three writes of one tagging commit together or not at all.
    fn record(&self, display_name: &str, hash: &str, tag: &str) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::insert_file(&tx, display_name, hash)?;
        Self::insert_tag(&tx, tag)?;
        let inserted = Self::insert_association(&tx, hash, display_name, tag)?;
        tx.commit()?;
        tracing::debug!("[SqlIndex] Recorded {} ({}) under '{}' (new: {})", display_name, hash, tag, inserted);
        Ok(())
    }

    /// Set containment by count: a file qualifies when the number of
    /// DISTINCT query tags it carries equals the (de-duplicated) query size.
    fn files_with_all(&self, tags: &[String]) -> Result<BTreeSet<FileEntry>> {
        let tags = dedup_tags(tags);
        let mut results = BTreeSet::new();
        let Some(first) = tags.first() else {
            return Ok(results);
        };

        let placeholders = vec!["?"; tags.len()].join(", ");
        let sql = format!(
            "SELECT ft.name, f.hash FROM file f
             JOIN file_tag ft ON f.id = ft.file_id
             JOIN tag t ON ft.tag_id = t.id
             WHERE t.name = ? AND f.id IN (
                 SELECT ft2.file_id FROM file_tag ft2
                 JOIN tag t2 ON ft2.tag_id = t2.id
                 WHERE t2.name IN ({})
                 GROUP BY ft2.file_id
                 HAVING COUNT(DISTINCT ft2.tag_id) = {}
             )",
            placeholders,
            tags.len()
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let bound = std::iter::once(first).chain(tags.iter());
        let rows = stmt.query_map(params_from_iter(bound), |row| {
            Ok(FileEntry { display_name: row.get(0)?, hash: row.get(1)? })
        })?;
        for r in rows { results.insert(r?); }

        tracing::trace!("[SqlIndex] {:?} -> {} files", tags, results.len());
        Ok(results)
    }
}
