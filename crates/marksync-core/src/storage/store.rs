//! A single bookmark store tier
//!
//! A `Store` owns one SQLite connection behind a mutex. Tiers differ only
//! in where that connection points: a private in-memory database for
//! buffers and caches, or a file for the durable disk tier.

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, migrate};
use crate::hash;
use crate::models::{NodeId, RawBookmark, SyncNode};
use crate::tags::DEFAULT_TAG_SEP;

/// Where a store keeps its pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Private in-memory database
    Memory,
    /// Database file on disk
    File(PathBuf),
}

/// A named bookmark store
pub struct Store {
    name: String,
    kind: StoreKind,
    tag_sep: char,
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("tag_sep", &self.tag_sep)
            .finish()
    }
}

impl Store {
    /// Open a fresh in-memory store with the current schema
    pub fn open_memory(name: impl Into<String>) -> StorageResult<Self> {
        let name = name.into();
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        debug!(store = %name, "Opened in-memory store");

        Ok(Self {
            name,
            kind: StoreKind::Memory,
            tag_sep: DEFAULT_TAG_SEP,
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) a store backed by a file, migrating it if needed
    pub fn open_file(name: impl Into<String>, path: impl AsRef<Path>) -> StorageResult<Self> {
        let name = name.into();
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    StorageError::CreateDirectory {
                        path: parent.to_path_buf(),
                        source,
                    }
                })?;
            }
        }

        let conn = Connection::open(&path)?;
        let version = migrate(&conn)?;
        debug!(store = %name, path = %path.display(), version, "Opened file store");

        Ok(Self {
            name,
            kind: StoreKind::File(path),
            tag_sep: DEFAULT_TAG_SEP,
            conn: Mutex::new(conn),
        })
    }

    /// Open an existing file read-only without touching its schema
    pub fn open_file_readonly(name: impl Into<String>, path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(StorageError::NotFound { path });
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        hash::register_sql_function(&conn)?;

        Ok(Self {
            name: name.into(),
            kind: StoreKind::File(path),
            tag_sep: DEFAULT_TAG_SEP,
            conn: Mutex::new(conn),
        })
    }

    /// Use `sep` to encode and decode tags in this store
    pub fn with_tag_sep(mut self, sep: char) -> Self {
        self.tag_sep = sep;
        self
    }

    pub fn tag_sep(&self) -> char {
        self.tag_sep
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StoreKind {
        &self.kind
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            StoreKind::File(path) => Some(path),
            StoreKind::Memory => None,
        }
    }

    /// Lock the underlying connection
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    // ==================== Row Access ====================

    /// Number of bookmarks in the store
    pub fn count(&self) -> StorageResult<usize> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM gskbookmarks", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.count()? == 0)
    }

    /// All rows, ordered by id
    pub fn all(&self) -> StorageResult<Vec<RawBookmark>> {
        let conn = self.conn();
        read_all(&conn)
    }

    /// Look up a single row by URL
    pub fn get(&self, url: &str) -> StorageResult<Option<RawBookmark>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM gskbookmarks WHERE URL = ?1",
                    RawBookmark::COLUMNS
                ),
                [url],
                RawBookmark::from_row,
            )
            .optional()?;
        Ok(row)
    }

    // ==================== Sync Nodes ====================

    /// Read the node stored at `ordinal`, or register `fallback` there
    ///
    /// Ordinal 1 holds the local node of a durable store.
    pub fn node_at_or_insert(&self, ordinal: i64, fallback: NodeId) -> StorageResult<NodeId> {
        let conn = self.conn();
        let existing: Option<NodeId> = conn
            .query_row(
                "SELECT node_id FROM sync_nodes WHERE ordinal = ?1",
                [ordinal],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(node) => Ok(node),
            None => {
                conn.execute(
                    "INSERT INTO sync_nodes (ordinal, node_id, version) VALUES (?1, ?2, 0)",
                    rusqlite::params![ordinal, fallback],
                )?;
                Ok(fallback)
            }
        }
    }

    /// Record the highest version produced by `node`
    pub fn record_node_version(&self, node: NodeId, version: u64) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO sync_nodes (node_id, version) VALUES (?1, ?2)
             ON CONFLICT(node_id) DO UPDATE SET version = MAX(version, excluded.version)",
            rusqlite::params![node, version as i64],
        )?;
        Ok(())
    }

    pub fn sync_nodes(&self) -> StorageResult<Vec<SyncNode>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT node_id, version FROM sync_nodes ORDER BY ordinal")?;
        let nodes = stmt
            .query_map([], |row| {
                Ok(SyncNode {
                    node_id: row.get(0)?,
                    version: row.get::<_, i64>(1)?.max(0) as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }
}

/// Read every bookmark row from a connection
pub(crate) fn read_all(conn: &Connection) -> StorageResult<Vec<RawBookmark>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM gskbookmarks ORDER BY id",
        RawBookmark::COLUMNS
    ))?;
    let rows = stmt
        .query_map([], RawBookmark::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
