//! Data models for marksync
//!
//! Defines the values that flow through the pipeline: the normalized
//! [`Bookmark`] produced by sources, the persisted [`RawBookmark`] row,
//! and the [`NodeId`]/[`SyncNode`] pair used for version bookkeeping.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tags::Tags;

/// A bookmark as handed over by a source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    /// The URL, unique across a store
    pub url: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Tags attached by the user or the source
    #[serde(default)]
    pub tags: Tags,
    /// Free-form description
    #[serde(default)]
    pub desc: String,
    /// Identifier of the source that produced this bookmark
    #[serde(default)]
    pub module: String,
    /// When the bookmark was last modified
    #[serde(default = "Utc::now")]
    pub modified: DateTime<Utc>,
}

impl Bookmark {
    /// Create a new bookmark for the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            tags: Tags::new(),
            desc: String::new(),
            module: String::new(),
            modified: Utc::now(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Add tags, sanitizing each one
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            self.tags.insert(tag.as_ref());
        }
        self
    }
}

/// A bookmark row as persisted in any store tier
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RawBookmark {
    pub id: i64,
    pub url: String,
    /// Title, kept in the `metadata` column
    pub title: String,
    /// Wrapped tag encoding, see [`crate::tags`]
    pub tags: String,
    pub desc: String,
    /// Unix seconds
    pub modified: i64,
    pub flags: i64,
    pub module: String,
    pub xhsum: String,
    /// Lamport version of the last write
    pub version: u64,
    /// Node that produced the last write
    pub node_id: NodeId,
}

impl RawBookmark {
    /// Column list matching [`RawBookmark::from_row`]
    pub const COLUMNS: &'static str =
        "id, URL, metadata, tags, desc, modified, flags, module, xhsum, version, node_id";

    /// Map a row selected with [`RawBookmark::COLUMNS`]
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            tags: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            desc: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            modified: row.get::<_, Option<i64>>(5)?.unwrap_or_default(),
            flags: row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
            module: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            xhsum: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            version: row.get::<_, Option<i64>>(9)?.unwrap_or_default().max(0) as u64,
            node_id: row.get::<_, Option<NodeId>>(10)?.unwrap_or_default(),
        })
    }

    /// Tag set decoded with the separator of the store it was read from
    pub fn tag_set(&self, sep: char) -> Tags {
        Tags::parse_with(&self.tags, sep)
    }
}

/// Identity of a node producing writes
///
/// Stored as a 16 byte BLOB. The nil id marks rows written before
/// versioning existed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql for NodeId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_bytes().to_vec()))
    }
}

impl FromSql for NodeId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = value.as_blob()?;
        Uuid::from_slice(bytes)
            .map(NodeId)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Highest version known to have been produced by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncNode {
    pub node_id: NodeId,
    pub version: u64,
}
