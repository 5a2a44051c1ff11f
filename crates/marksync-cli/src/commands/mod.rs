//! Command handlers

pub mod bookmark;
pub mod config;
pub mod daemon;
pub mod import;
pub mod status;
pub mod tag;

use anyhow::{bail, Context, Result};

use marksync_core::{Config, Store};

/// Open the durable database for reading
///
/// The file is migrated to the current schema if it is older.
pub fn open_database(config: &Config) -> Result<Store> {
    let path = config.db_path();
    if !path.exists() {
        bail!(
            "No database at {}. Run `marksync import` or `marksync daemon` first.",
            path.display()
        );
    }
    let store = Store::open_file("disk", &path)
        .with_context(|| format!("Failed to open database: {:?}", path))?;
    Ok(store.with_tag_sep(config.tag_separator))
}
