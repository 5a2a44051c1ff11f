//! File-backed bookmark sources
//!
//! A [`FileSource`] reads one of:
//!
//! - a JSON array of bookmark objects
//! - a plain text file with one `URL [tag ...]` entry per line, skipping
//!   blank lines and lines starting with `#`
//! - a buku-style SQLite database, read through a snapshot copy when another
//!   process holds it locked

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::{SourceConfig, SourceFormat};
use crate::models::Bookmark;
use crate::registry::{Loader, ModuleSpec, Producer};
use crate::storage::{open_snapshot, LockChecker, SqliteLockChecker, Store};
use crate::tags::Tags;
use crate::watch::Watch;

/// Bookmarks read from a local file
#[derive(Clone)]
pub struct FileSource {
    path: PathBuf,
    format: SourceFormat,
    scratch_dir: PathBuf,
    checker: Arc<dyn LockChecker>,
}

impl std::fmt::Debug for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat) -> Self {
        Self {
            path: path.into(),
            format,
            scratch_dir: std::env::temp_dir().join("marksync"),
            checker: Arc::new(SqliteLockChecker),
        }
    }

    /// Directory receiving snapshot copies of locked databases
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_lock_checker(mut self, checker: Arc<dyn LockChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }
}

impl Loader for FileSource {
    fn load(&self) -> Result<Vec<Bookmark>> {
        match self.format {
            SourceFormat::Json => parse_json(&self.read()?)
                .with_context(|| format!("Failed to parse JSON source: {:?}", self.path)),
            SourceFormat::Text => Ok(parse_text(&self.read()?)),
            SourceFormat::Buku => self.load_database(),
        }
    }
}

impl FileSource {
    fn read(&self) -> Result<String> {
        std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read source file: {:?}", self.path))
    }

    fn load_database(&self) -> Result<Vec<Bookmark>> {
        let store = if self.checker.is_locked(&self.path)? {
            debug!(path = %self.path.display(), "Source database locked, reading a snapshot");
            open_snapshot(&self.path, &self.scratch_dir)?
        } else {
            Store::open_file_readonly("source", &self.path)?
        };

        let conn = store.conn();
        let mut stmt = conn
            .prepare("SELECT URL, metadata, tags, desc FROM bookmarks")
            .with_context(|| format!("No bookmarks table in {:?}", self.path))?;
        let bookmarks = stmt
            .query_map([], |row| {
                let url: String = row.get(0)?;
                let title: Option<String> = row.get(1)?;
                let tags: Option<String> = row.get(2)?;
                let desc: Option<String> = row.get(3)?;
                Ok(Bookmark::new(url)
                    .with_title(title.unwrap_or_default())
                    .with_desc(desc.unwrap_or_default())
                    // buku joins tags with a comma whatever this process uses
                    .with_tags(Tags::parse(tags.as_deref().unwrap_or_default()).iter()))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(bookmarks)
    }
}

/// Parse a JSON array of bookmarks, skipping entries without a URL
pub fn parse_json(content: &str) -> Result<Vec<Bookmark>> {
    let bookmarks: Vec<Bookmark> = serde_json::from_str(content)?;
    Ok(bookmarks
        .into_iter()
        .filter(|bk| !bk.url.trim().is_empty())
        .collect())
}

/// Parse `URL [tag ...]` lines
pub fn parse_text(content: &str) -> Vec<Bookmark> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let url = parts.next()?;
            Some(Bookmark::new(url).with_tags(parts))
        })
        .collect()
}

/// Build the registration for a configured file source
pub fn module_spec(config: &SourceConfig, scratch_dir: &Path) -> ModuleSpec {
    let source = FileSource::new(&config.path, config.format).with_scratch_dir(scratch_dir);
    let mut spec = ModuleSpec::new(&config.id, Producer::Loader(Arc::new(source)))
        .watch(Watch::file(&config.path).reset_watch(config.reset_watch))
        .policy(config.policy);

    if let Some(secs) = config.poll_interval_secs {
        spec = spec.poll_every(Duration::from_secs(secs));
    }
    spec
}
