//! Daemon command: watch every configured source until interrupted

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use marksync_core::sources::module_spec;
use marksync_core::{Config, Engine, Registry};

use crate::output::Output;

pub async fn run(config: Config, output: &Output) -> Result<()> {
    let mut registry = Registry::new();
    for source in &config.sources {
        registry
            .add(module_spec(source, &config.scratch_dir()))
            .with_context(|| format!("Invalid source '{}'", source.id))?;
    }
    if registry.is_empty() {
        warn!("No sources configured; only the existing database will be kept");
    }

    let engine = Engine::open(config).context("Failed to start engine")?;
    output.message(&format!(
        "Watching {} source(s), database at {}",
        registry.len(),
        engine.db_path().display()
    ));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for interrupt, shutting down"),
        }
        // Engine may already have stopped
        let _ = stop_tx.send(true);
    });

    engine.run(registry, stop_rx).await?;
    output.message("Stopped.");
    Ok(())
}
