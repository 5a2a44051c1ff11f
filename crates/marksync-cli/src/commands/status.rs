//! Status command handler

use anyhow::Result;

use marksync_core::storage::schema::get_schema_version;
use marksync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show database status
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let store = super::open_database(config)?;
    let path = config.db_path();

    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let count = store.count()?;
    let schema = get_schema_version(&store.conn())?;
    let nodes = store.sync_nodes()?;
    let local = nodes.first();

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "database": path,
                "size": size,
                "schema_version": schema,
                "bookmarks": count,
                "node_id": local.map(|n| n.node_id.to_string()),
                "version": local.map(|n| n.version),
                "nodes": nodes,
                "sources": config.sources.len(),
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", count);
        }
        OutputFormat::Human => {
            println!("marksync Status");
            println!("===============");
            println!();
            println!("Database:");
            println!("  Location: {}", path.display());
            println!("  Size:     {}", human_size(size));
            println!(
                "  Schema:   v{}",
                schema.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string())
            );
            println!();
            println!("Node:");
            match local {
                Some(node) => {
                    println!("  ID:      {}", node.node_id);
                    println!("  Version: {}", node.version);
                }
                None => println!("  (not registered)"),
            }
            println!();
            println!("Contents:");
            println!("  Bookmarks: {}", count);
            println!("  Sources:   {}", config.sources.len());
        }
    }

    Ok(())
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }
}
