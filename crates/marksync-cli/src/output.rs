//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use marksync_core::{LoadReport, QueryResult, RawBookmark};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("Error: failed to serialize output: {}", e),
        }
    }

    /// Print one page of bookmarks whose tags are joined with `tag_sep`
    pub fn print_bookmarks(&self, result: &QueryResult, tag_sep: char) {
        match self.format {
            OutputFormat::Human => {
                if result.bookmarks.is_empty() {
                    println!("No bookmarks found.");
                    return;
                }
                for bk in &result.bookmarks {
                    print_bookmark_line(bk, tag_sep);
                }
                println!(
                    "\n{} of {} bookmark(s)",
                    result.bookmarks.len(),
                    result.total
                );
            }
            OutputFormat::Json => self.json(result),
            OutputFormat::Quiet => {
                for bk in &result.bookmarks {
                    println!("{}", bk.url);
                }
            }
        }
    }

    /// Print a list of tags
    pub fn print_tags(&self, tags: &[(String, usize)]) {
        match self.format {
            OutputFormat::Human => {
                if tags.is_empty() {
                    println!("No tags found.");
                    return;
                }
                for (name, count) in tags {
                    println!("{} ({})", name, count);
                }
                println!("\n{} tag(s)", tags.len());
            }
            OutputFormat::Json => {
                let json_tags: Vec<_> = tags
                    .iter()
                    .map(|(name, count)| serde_json::json!({"name": name, "count": count}))
                    .collect();
                self.json(&json_tags);
            }
            OutputFormat::Quiet => {
                for (name, _) in tags {
                    println!("{}", name);
                }
            }
        }
    }

    /// Print the outcome of a load cycle
    pub fn print_load_report(&self, report: &LoadReport) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "✓ Imported {} bookmark(s) as '{}': {} new, {} updated, {} unchanged",
                    report.received, report.module, report.inserted, report.updated, report.unchanged
                );
                if report.failed > 0 {
                    println!("  {} bookmark(s) could not be imported", report.failed);
                }
            }
            OutputFormat::Json => self.json(report),
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_bookmark_line(bk: &RawBookmark, tag_sep: char) {
    let title = if bk.title.is_empty() { "-" } else { &bk.title };
    let tags = bk.tag_set(tag_sep).to_string();
    if tags.is_empty() {
        println!("{} | {}", truncate(title, 35), truncate(&bk.url, 60));
    } else {
        println!(
            "{} | {} | {}",
            truncate(title, 35),
            truncate(&bk.url, 60),
            truncate(&tags, 30)
        );
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
