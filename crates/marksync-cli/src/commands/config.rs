//! Config command handlers

use std::path::Path;

use anyhow::Result;

use marksync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => output.json(config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:            {}", config.data_dir.display());
            println!("  db_file:             {}", config.db_file);
            println!("  sync_interval_ms:    {}", config.sync_interval_ms);
            println!("  reducer_interval_ms: {}", config.reducer_interval_ms);
            println!("  tag_separator:       {:?}", config.tag_separator);
            println!(
                "  log_file:            {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            if config.sources.is_empty() {
                println!("Sources: (none)");
            } else {
                println!("Sources:");
                for source in &config.sources {
                    println!(
                        "  {} [{:?}, {:?}] {}",
                        source.id,
                        source.format,
                        source.policy,
                        source.path.display()
                    );
                }
            }
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}
