//! Bookmark listing and search

use anyhow::Result;

use marksync_core::{Config, Pagination};

use crate::output::Output;

/// List bookmarks, optionally filtered by tag and/or free text
pub fn list(
    config: &Config,
    tag: Option<String>,
    search: Option<String>,
    pagination: Pagination,
    output: &Output,
) -> Result<()> {
    let store = super::open_database(config)?;

    let result = match (search.as_deref(), tag.as_deref()) {
        (Some(query), tag) => store.search(query, tag, pagination)?,
        (None, Some(tag)) => store.by_tag(tag, pagination)?,
        (None, None) => store.list(pagination)?,
    };

    output.print_bookmarks(&result, store.tag_sep());
    Ok(())
}
