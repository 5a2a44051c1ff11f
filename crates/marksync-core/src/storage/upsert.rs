//! Insert-or-merge of a single bookmark into one store
//!
//! A URL is unique within a store. Writing a bookmark whose URL already
//! exists never replaces the stored tags: the incoming set is union-merged
//! into the stored one, and the row is only rewritten when the merged
//! fingerprint differs from the stored fingerprint.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::trace;

use super::error::{is_unique_violation, StorageError, StorageResult};
use super::store::Store;
use crate::clock::Stamper;
use crate::hash::xhsum;
use crate::models::{Bookmark, NodeId};
use crate::normalize::normalize;
use crate::tags::Tags;

/// Result of attempting to insert a row whose URL may already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryInsert {
    Inserted,
    /// A row with the same URL is already present
    Conflict,
}

/// What an upsert did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// A complete row ready to be inserted
#[derive(Debug, Clone)]
pub(crate) struct NewRow<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub tags: &'a str,
    pub desc: &'a str,
    pub modified: i64,
    pub flags: i64,
    pub module: &'a str,
    pub xhsum: &'a str,
    pub version: u64,
    pub node_id: NodeId,
}

/// Insert a row, reporting a URL collision as [`TryInsert::Conflict`]
pub(crate) fn try_insert(conn: &Connection, row: &NewRow<'_>) -> StorageResult<TryInsert> {
    let result = conn
        .prepare_cached(
            "INSERT INTO gskbookmarks
                (URL, metadata, tags, desc, modified, flags, module, xhsum, version, node_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?
        .execute(params![
            row.url,
            row.title,
            row.tags,
            row.desc,
            row.modified,
            row.flags,
            row.module,
            row.xhsum,
            row.version as i64,
            row.node_id,
        ]);

    match result {
        Ok(_) => Ok(TryInsert::Inserted),
        Err(e) if is_unique_violation(&e) => Ok(TryInsert::Conflict),
        Err(e) => Err(e.into()),
    }
}

/// The fields of a stored row that take part in a merge
#[derive(Debug, Clone)]
pub(crate) struct StoredState {
    pub title: String,
    pub tags: Tags,
    pub desc: String,
    pub xhsum: String,
}

pub(crate) fn read_state(conn: &Connection, url: &str, sep: char) -> StorageResult<StoredState> {
    let state = conn
        .prepare_cached("SELECT metadata, tags, desc, xhsum FROM gskbookmarks WHERE URL = ?1")?
        .query_row([url], |row| {
            Ok(StoredState {
                title: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                tags: Tags::parse_with(&row.get::<_, Option<String>>(1)?.unwrap_or_default(), sep),
                desc: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                xhsum: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            })
        })?;
    Ok(state)
}

/// Merged view of a stored row and an incoming one
#[derive(Debug, Clone)]
pub(crate) struct Merged {
    pub title: String,
    pub tags: Tags,
    pub desc: String,
    pub xhsum: String,
}

impl Merged {
    /// Union the tags and keep stored text wherever the incoming text is empty
    pub fn of(url: &str, stored: &StoredState, title: &str, tags: &Tags, desc: &str) -> Self {
        let title = if title.is_empty() {
            stored.title.as_str()
        } else {
            title
        };
        let desc = if desc.is_empty() {
            stored.desc.as_str()
        } else {
            desc
        };
        let tags = stored.tags.merged(tags);
        let xhsum = xhsum(url, title, &tags.wrapped(), desc);

        Self {
            title: title.to_string(),
            tags,
            desc: desc.to_string(),
            xhsum,
        }
    }

    pub fn changes(&self, stored: &StoredState) -> bool {
        self.xhsum != stored.xhsum
    }
}

pub(crate) fn write_merged(
    conn: &Connection,
    url: &str,
    merged: &Merged,
    version: u64,
    node_id: NodeId,
) -> StorageResult<()> {
    conn.prepare_cached(
        "UPDATE gskbookmarks
         SET metadata = ?1, tags = ?2, desc = ?3, xhsum = ?4,
             modified = ?5, version = ?6, node_id = ?7
         WHERE URL = ?8",
    )?
    .execute(params![
        merged.title,
        merged.tags.wrapped(),
        merged.desc,
        merged.xhsum,
        Utc::now().timestamp(),
        version as i64,
        node_id,
        url,
    ])?;
    Ok(())
}

/// Set the version of a row inserted before its version was drawn
fn stamp_version(conn: &Connection, url: &str, version: u64) -> StorageResult<()> {
    conn.prepare_cached("UPDATE gskbookmarks SET version = ?1 WHERE URL = ?2")?
        .execute(params![version as i64, url])?;
    Ok(())
}

impl Store {
    /// Insert a bookmark, or merge it into the existing row with the same URL
    ///
    /// Runs in a single transaction. Calling this twice with the same
    /// bookmark writes at most once, and the stored tag set for a URL only
    /// ever grows. The clock advances only when a row is written.
    pub fn upsert_bookmark(&self, bk: &Bookmark, stamper: &Stamper) -> StorageResult<UpsertOutcome> {
        let mut bk = bk.clone();
        normalize(&mut bk, self.tag_sep());
        if bk.url.is_empty() {
            return Err(StorageError::InvalidBookmark("empty URL".to_string()));
        }

        let tags = bk.tags.wrapped();
        let candidate = xhsum(&bk.url, &bk.title, &tags, &bk.desc);

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let inserted = try_insert(
            &tx,
            &NewRow {
                url: &bk.url,
                title: &bk.title,
                tags: &tags,
                desc: &bk.desc,
                modified: bk.modified.timestamp(),
                flags: 0,
                module: &bk.module,
                xhsum: &candidate,
                version: 0,
                node_id: stamper.node_id(),
            },
        )?;

        if inserted == TryInsert::Inserted {
            let version = stamper.local_tick();
            stamp_version(&tx, &bk.url, version)?;
            tx.commit()?;
            trace!(store = %self.name(), url = %bk.url, version, "Inserted bookmark");
            return Ok(UpsertOutcome::Inserted);
        }

        let stored = read_state(&tx, &bk.url, self.tag_sep())?;
        if stored.xhsum == candidate {
            trace!(store = %self.name(), url = %bk.url, "Same hash, skipping");
            tx.rollback()?;
            return Ok(UpsertOutcome::Unchanged);
        }

        let merged = Merged::of(&bk.url, &stored, &bk.title, &bk.tags, &bk.desc);
        if !merged.changes(&stored) {
            trace!(store = %self.name(), url = %bk.url, "Merge is a no-op, skipping");
            tx.rollback()?;
            return Ok(UpsertOutcome::Unchanged);
        }

        let version = stamper.local_tick();
        write_merged(&tx, &bk.url, &merged, version, stamper.node_id())?;
        tx.commit()?;

        trace!(
            store = %self.name(),
            url = %bk.url,
            tags = %merged.tags,
            version,
            "Updated bookmark"
        );
        Ok(UpsertOutcome::Updated)
    }
}
