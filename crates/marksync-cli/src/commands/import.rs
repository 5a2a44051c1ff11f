//! Import command: one load cycle from a file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use marksync_core::registry::Loader;
use marksync_core::{Config, Engine, FileSource, SourceFormat};

use crate::output::Output;

pub fn run(
    config: Config,
    file: PathBuf,
    format: Option<SourceFormat>,
    id: Option<String>,
    output: &Output,
) -> Result<()> {
    let format = format.unwrap_or_else(|| detect_format(&file));
    let id = id.unwrap_or_else(|| default_id(&file));

    let source = FileSource::new(&file, format).with_scratch_dir(config.scratch_dir());
    let bookmarks = source
        .load()
        .with_context(|| format!("Failed to read bookmarks from {:?}", file))?;

    let engine = Engine::open(config).context("Failed to open database")?;
    let report = engine.import(&id, bookmarks)?;
    engine.flush().context("Failed to write database")?;

    output.print_load_report(&report);
    Ok(())
}

/// Guess the source format from the file extension
fn detect_format(path: &Path) -> SourceFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => SourceFormat::Json,
        Some("db" | "sqlite" | "sqlite3") => SourceFormat::Buku,
        _ => SourceFormat::Text,
    }
}

/// Source id recorded for imported bookmarks: the file stem
fn default_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "import".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("a/bookmarks.JSON")), SourceFormat::Json);
        assert_eq!(detect_format(Path::new("bookmarks.db")), SourceFormat::Buku);
        assert_eq!(detect_format(Path::new("links.txt")), SourceFormat::Text);
        assert_eq!(detect_format(Path::new("links")), SourceFormat::Text);
    }

    #[test]
    fn test_default_id() {
        assert_eq!(default_id(Path::new("/tmp/reading-list.txt")), "reading-list");
        assert_eq!(default_id(Path::new("/")), "import");
    }
}
