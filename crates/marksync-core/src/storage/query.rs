//! Read queries over a store
//!
//! Tag filters match against the wrapped tag encoding (`,a,b,`) built with
//! the store's separator, so a search for `rust` never matches a tag named
//! `rustacean`.

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use super::error::{StorageError, StorageResult};
use super::store::Store;
use crate::models::RawBookmark;
use crate::tags::{delim_wrap, sanitize, Tags};

/// Page selection for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page number
    pub page: usize,
    pub size: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, size: 50 }
    }
}

impl Pagination {
    /// A single page large enough to hold everything
    pub fn all() -> Self {
        Self {
            page: 1,
            size: i64::MAX as usize,
        }
    }

    fn limit(&self) -> i64 {
        self.size.min(i64::MAX as usize) as i64
    }

    fn offset(&self) -> i64 {
        (self.page.saturating_sub(1).saturating_mul(self.size)).min(i64::MAX as usize) as i64
    }
}

/// One page of results plus the total number of matches
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub bookmarks: Vec<RawBookmark>,
    pub total: usize,
}

/// Escape `%`, `_` and the escape character for use in a LIKE pattern
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn contains_pattern(s: &str) -> String {
    format!("%{}%", like_escape(s))
}

fn tag_pattern(tag: &str, sep: char) -> String {
    format!("%{}%", like_escape(&delim_wrap(&sanitize(tag.trim(), sep), sep)))
}

impl Store {
    fn select_page(
        &self,
        condition: &str,
        args: &[&dyn rusqlite::ToSql],
        pagination: Pagination,
    ) -> StorageResult<QueryResult> {
        let conn = self.conn();

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM gskbookmarks WHERE {}", condition),
            args,
            |row| row.get(0),
        )?;

        let mut page_args: Vec<&dyn rusqlite::ToSql> = args.to_vec();
        let limit = pagination.limit();
        let offset = pagination.offset();
        page_args.push(&limit);
        page_args.push(&offset);

        let n = args.len();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM gskbookmarks WHERE {} ORDER BY modified DESC, id DESC LIMIT ?{} OFFSET ?{}",
            RawBookmark::COLUMNS,
            condition,
            n + 1,
            n + 2
        ))?;
        let bookmarks = stmt
            .query_map(page_args.as_slice(), RawBookmark::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(QueryResult {
            bookmarks,
            total: total.max(0) as usize,
        })
    }

    /// List bookmarks, most recently modified first
    pub fn list(&self, pagination: Pagination) -> StorageResult<QueryResult> {
        self.select_page("1", &[], pagination)
    }

    /// Bookmarks carrying `tag`
    pub fn by_tag(&self, tag: &str, pagination: Pagination) -> StorageResult<QueryResult> {
        if tag.trim().is_empty() {
            return Err(StorageError::InvalidStore("empty tag provided".to_string()));
        }
        let pattern = tag_pattern(tag, self.tag_sep());
        self.select_page("tags LIKE ?1 ESCAPE '\\'", params![pattern], pagination)
    }

    /// Free-text search over URL, title and tags, optionally restricted to a tag
    pub fn search(
        &self,
        query: &str,
        tag: Option<&str>,
        pagination: Pagination,
    ) -> StorageResult<QueryResult> {
        let query = query.trim();
        if query.is_empty() {
            return Err(StorageError::InvalidStore("empty search query".to_string()));
        }
        let text = contains_pattern(query);

        match tag.map(str::trim).filter(|t| !t.is_empty()) {
            Some(tag) => {
                let tag = tag_pattern(tag, self.tag_sep());
                self.select_page(
                    "(URL LIKE ?1 ESCAPE '\\' OR metadata LIKE ?1 ESCAPE '\\') AND tags LIKE ?2 ESCAPE '\\'",
                    params![text, tag],
                    pagination,
                )
            }
            None => self.select_page(
                "URL LIKE ?1 ESCAPE '\\' OR metadata LIKE ?1 ESCAPE '\\' OR tags LIKE ?1 ESCAPE '\\'",
                params![text],
                pagination,
            ),
        }
    }

    /// Every tag in the store with the number of bookmarks carrying it
    pub fn tags_with_counts(&self) -> StorageResult<Vec<(String, usize)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT tags FROM gskbookmarks")?;
        let encoded = stmt
            .query_map([], |row| row.get::<_, Option<String>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for tags in encoded.into_iter().flatten() {
            for tag in Tags::parse_with(&tags, self.tag_sep()).iter() {
                *counts.entry(tag.to_string()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{LamportClock, Stamper};
    use crate::models::{Bookmark, NodeId};
    use std::sync::Arc;

    fn store() -> Store {
        let stamper = Stamper::new(Arc::new(LamportClock::new(0)), NodeId::new());
        let store = Store::open_memory("disk").unwrap();
        let seed = [
            ("https://rust-lang.org", "Rust", vec!["rust", "lang"]),
            ("https://crates.io", "Crates", vec!["rustacean"]),
            ("https://sqlite.org", "SQLite", vec!["db"]),
            ("https://100%.example", "Percent", vec![]),
        ];
        for (url, title, tags) in seed {
            let bk = Bookmark::new(url).with_title(title).with_tags(tags);
            store.upsert_bookmark(&bk, &stamper).unwrap();
        }
        store
    }

    #[test]
    fn test_list_paginates() {
        let store = store();
        let page = store.list(Pagination { page: 1, size: 3 }).unwrap();
        assert_eq!(page.total, 4);
        assert_eq!(page.bookmarks.len(), 3);

        let page = store.list(Pagination { page: 2, size: 3 }).unwrap();
        assert_eq!(page.bookmarks.len(), 1);
    }

    #[test]
    fn test_by_tag_is_exact() {
        let store = store();
        let result = store.by_tag("rust", Pagination::default()).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.bookmarks[0].url, "https://rust-lang.org");
    }

    #[test]
    fn test_by_tag_rejects_empty() {
        assert!(store().by_tag("  ", Pagination::default()).is_err());
    }

    #[test]
    fn test_search_matches_url_title_and_tags() {
        let store = store();
        assert_eq!(store.search("rust", None, Pagination::all()).unwrap().total, 2);
        assert_eq!(store.search("SQLite", None, Pagination::all()).unwrap().total, 1);
    }

    #[test]
    fn test_search_with_tag() {
        let store = store();
        let result = store.search("org", Some("db"), Pagination::all()).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.bookmarks[0].url, "https://sqlite.org");
    }

    #[test]
    fn test_search_escapes_wildcards() {
        let store = store();
        let result = store.search("100%", None, Pagination::all()).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(store.search("%", None, Pagination::all()).unwrap().total, 1);
    }

    #[test]
    fn test_by_tag_with_custom_separator() {
        let stamper = Stamper::new(Arc::new(LamportClock::new(0)), NodeId::new());
        let store = Store::open_memory("disk").unwrap().with_tag_sep('|');
        let bk = Bookmark::new("https://a.example").with_tags(["rust", "c,d"]);
        store.upsert_bookmark(&bk, &stamper).unwrap();

        assert_eq!(store.by_tag("rust", Pagination::all()).unwrap().total, 1);
        assert_eq!(store.by_tag("c--d", Pagination::all()).unwrap().total, 1);
        assert_eq!(
            store.tags_with_counts().unwrap(),
            vec![("c--d".to_string(), 1), ("rust".to_string(), 1)]
        );
    }

    #[test]
    fn test_tags_with_counts() {
        let store = store();
        let tags = store.tags_with_counts().unwrap();
        assert_eq!(
            tags,
            vec![
                ("db".to_string(), 1),
                ("lang".to_string(), 1),
                ("rust".to_string(), 1),
                ("rustacean".to_string(), 1),
            ]
        );
    }
}
