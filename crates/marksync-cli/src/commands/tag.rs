//! Tag command handlers

use anyhow::Result;

use marksync_core::Config;

use crate::output::Output;

/// List all tags with usage counts
pub fn list(config: &Config, output: &Output) -> Result<()> {
    let store = super::open_database(config)?;
    let tags = store.tags_with_counts()?;
    output.print_tags(&tags);
    Ok(())
}
