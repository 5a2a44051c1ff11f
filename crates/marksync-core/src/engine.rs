//! Engine context
//!
//! The [`Engine`] owns everything a running process shares: the two cache
//! tiers, the logical clock and local node id, the disk-sync scheduler and
//! the [`Pipeline`] built from them. It replaces process-wide globals, so
//! several engines can coexist (for example in tests).
//!
//! ## Startup
//!
//! If the durable database exists it is checked for an exclusive lock,
//! migrated to the current schema and restored into both caches.
//! Otherwise the empty L2 cache is written out to create it. The clock is
//! then seeded from the highest version in L2, counting both its rows and
//! the versions recorded for sync nodes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{LamportClock, Stamper};
use crate::config::Config;
use crate::debounce::{BlockingJob, Debouncer};
use crate::loader::{LoadReport, Pipeline};
use crate::models::{Bookmark, NodeId};
use crate::registry::{ModuleSpec, Policy, Registry};
use crate::scheduler::{disk_sink, scheduler};
use crate::storage::{
    ensure_unlocked, sync_from_disk, sync_to_disk, LockChecker, SqliteLockChecker, Store,
};
use crate::watch::reducer::reducer;
use crate::watch::{run_watch_loop, Dispatch, WatchDescriptor};

/// Ordinal of the local node in `sync_nodes`
const LOCAL_NODE: i64 = 1;

pub struct Engine {
    config: Config,
    db_path: PathBuf,
    pipeline: Arc<Pipeline>,
    disk_sink: BlockingJob,
    scheduler: Debouncer<()>,
}

impl Engine {
    /// Open the engine described by `config`
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_checker(config, &SqliteLockChecker)
    }

    /// Open the engine, probing the database lock with `checker`
    pub fn open_with_checker(config: Config, checker: &dyn LockChecker) -> Result<Self> {
        let db_path = config.db_path();
        let sep = config.tag_separator;
        let l1 = Arc::new(Store::open_memory("l1")?.with_tag_sep(sep));
        let l2 = Arc::new(Store::open_memory("l2")?.with_tag_sep(sep));

        let node = if db_path.exists() {
            ensure_unlocked(checker, &db_path)?;

            // Opening the file migrates it before the caches copy its pages
            let node = {
                let disk = Store::open_file("disk", &db_path)
                    .with_context(|| format!("Failed to open database: {:?}", db_path))?;
                disk.node_at_or_insert(LOCAL_NODE, NodeId::new())?
            };

            sync_from_disk(&l1, &db_path)?;
            sync_from_disk(&l2, &db_path)?;
            info!(path = %db_path.display(), rows = l2.count()?, "Restored database into caches");
            node
        } else {
            let node = NodeId::new();
            l2.node_at_or_insert(LOCAL_NODE, node)?;
            l1.node_at_or_insert(LOCAL_NODE, node)?;
            sync_to_disk(&l2, &db_path)?;
            info!(path = %db_path.display(), "Created database");
            node
        };

        let clock = LamportClock::from_store(&l2.conn())?;
        debug!(node = %node, version = clock.current(), "Seeded clock");
        let stamper = Stamper::new(Arc::new(clock), node);

        let sink = disk_sink(Arc::clone(&l2), db_path.clone(), stamper.clone());
        let (handle, debouncer) = scheduler(config.sync_interval(), Arc::clone(&sink));
        let pipeline = Arc::new(Pipeline::new(l1, l2, stamper, handle));

        Ok(Self {
            config,
            db_path,
            pipeline,
            disk_sink: sink,
            scheduler: debouncer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The terminal cache tier
    pub fn cache(&self) -> &Arc<Store> {
        self.pipeline.l2()
    }

    pub fn node_id(&self) -> NodeId {
        self.pipeline.stamper().node_id()
    }

    /// Current logical clock value
    pub fn version(&self) -> u64 {
        self.pipeline.stamper().clock().current()
    }

    /// Run one load cycle for `bookmarks` under source `id`
    pub fn import(&self, id: &str, bookmarks: Vec<Bookmark>) -> Result<LoadReport> {
        self.pipeline.ingest(id, bookmarks)
    }

    /// Write the cache to disk now, bypassing the debounce
    pub fn flush(&self) -> Result<()> {
        (self.disk_sink)()
    }

    /// Run every registered source until `stop` flips
    ///
    /// Each source gets an initial load, then a watch loop (with a reducer
    /// when debounced) and a poll loop when it declares an interval. A
    /// failing component is logged and never stops the others. Pending disk
    /// syncs are flushed once every source has stopped.
    pub async fn run(self, registry: Registry, stop: watch::Receiver<bool>) -> Result<()> {
        let Engine {
            config,
            pipeline,
            scheduler,
            ..
        } = self;

        // The scheduler outlives the sources so their last loads still reach disk
        let (scheduler_stop_tx, scheduler_stop_rx) = watch::channel(false);
        let scheduler_task = scheduler.spawn(scheduler_stop_rx);

        let mut tasks = Vec::new();
        for spec in registry {
            spawn_module(&pipeline, &config, spec, &stop, &mut tasks);
        }
        info!(tasks = tasks.len(), "Engine running");

        let mut stop_signal = stop.clone();
        while !*stop_signal.borrow() {
            if stop_signal.changed().await.is_err() {
                break;
            }
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Engine task panicked");
            }
        }

        // Receiver may already be gone if the scheduler exited on its own
        let _ = scheduler_stop_tx.send(true);
        if let Err(e) = scheduler_task.await {
            error!(error = %e, "Disk scheduler panicked");
        }
        info!("Engine stopped");
        Ok(())
    }
}

fn spawn_module(
    pipeline: &Arc<Pipeline>,
    config: &Config,
    spec: ModuleSpec,
    stop: &watch::Receiver<bool>,
    tasks: &mut Vec<JoinHandle<()>>,
) {
    let job = pipeline.job(&spec.id, &spec.producer);

    let initial = Arc::clone(&job);
    let id = spec.id.clone();
    tasks.push(tokio::spawn(async move {
        match tokio::task::spawn_blocking(move || initial()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(module = %id, error = %e, "Initial load failed"),
            Err(e) => error!(module = %id, error = %e, "Initial load panicked"),
        }
    }));

    if !spec.watches.is_empty() {
        match WatchDescriptor::new(spec.watches.clone()) {
            Ok(descriptor) => {
                let dispatch = match spec.policy {
                    Policy::Direct => Dispatch::Direct(Arc::clone(&job)),
                    Policy::Debounced => {
                        let (trigger, debouncer) =
                            reducer(&spec.id, config.reducer_interval(), Arc::clone(&job));
                        tasks.push(debouncer.spawn(stop.clone()));
                        Dispatch::Debounced(trigger)
                    }
                };
                tasks.push(tokio::spawn(run_watch_loop(
                    spec.id.clone(),
                    descriptor,
                    dispatch,
                    stop.clone(),
                )));
            }
            Err(e) => warn!(module = %spec.id, error = %e, "Watching disabled"),
        }
    }

    if let Some(interval) = spec.poll_interval {
        tasks.push(tokio::spawn(crate::poll::run_poll_loop(
            spec.id.clone(),
            interval,
            job,
            stop.clone(),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceConfig, SourceFormat};
    use crate::sources::module_spec;
    use crate::storage::{StorageError, StorageResult};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> Config {
        Config {
            data_dir: temp.path().to_path_buf(),
            sync_interval_ms: 50,
            reducer_interval_ms: 50,
            ..Config::default()
        }
    }

    #[test]
    fn test_open_creates_database() {
        let temp = TempDir::new().unwrap();
        let engine = Engine::open(test_config(&temp)).unwrap();

        assert!(engine.db_path().exists());
        assert_eq!(engine.version(), 0);
        assert!(!engine.node_id().is_nil());
    }

    #[test]
    fn test_reopen_restores_rows_node_and_clock() {
        let temp = TempDir::new().unwrap();

        let (node, version) = {
            let engine = Engine::open(test_config(&temp)).unwrap();
            engine
                .import(
                    "test",
                    vec![
                        Bookmark::new("https://a.example"),
                        Bookmark::new("https://b.example"),
                    ],
                )
                .unwrap();
            engine.flush().unwrap();
            (engine.node_id(), engine.version())
        };

        let engine = Engine::open(test_config(&temp)).unwrap();
        assert_eq!(engine.cache().count().unwrap(), 2);
        assert_eq!(engine.pipeline().l1().count().unwrap(), 2);
        assert_eq!(engine.node_id(), node);
        assert_eq!(engine.version(), version);
    }

    #[test]
    fn test_reopen_after_noop_imports_keeps_clock_ahead() {
        let temp = TempDir::new().unwrap();
        let bk = Bookmark::new("https://a.example").with_tags(["x"]);

        let recorded = {
            let engine = Engine::open(test_config(&temp)).unwrap();
            for _ in 0..5 {
                engine.import("test", vec![bk.clone()]).unwrap();
            }
            engine.flush().unwrap();

            // Each cycle stages into a fresh buffer; the cached row is untouched
            let row = engine.cache().get("https://a.example").unwrap().unwrap();
            assert_eq!(row.version, 1);

            let recorded = engine.cache().sync_nodes().unwrap()[0].version;
            assert_eq!(recorded, engine.version());
            recorded
        };
        assert!(recorded > 1);

        let engine = Engine::open(test_config(&temp)).unwrap();
        assert_eq!(engine.version(), recorded);

        engine
            .import("test", vec![Bookmark::new("https://b.example")])
            .unwrap();
        let row = engine.cache().get("https://b.example").unwrap().unwrap();
        assert!(row.version > recorded);
    }

    #[test]
    fn test_clock_seeded_from_recorded_node_version() {
        let temp = TempDir::new().unwrap();
        let node = {
            let engine = Engine::open(test_config(&temp)).unwrap();
            engine.import("test", vec![Bookmark::new("https://a.example")]).unwrap();
            engine.flush().unwrap();
            engine.node_id()
        };

        // A node version above every row, as left by another writer
        {
            let disk = Store::open_file("disk", temp.path().join("marksync.db")).unwrap();
            disk.record_node_version(node, 9).unwrap();
        }

        let engine = Engine::open(test_config(&temp)).unwrap();
        assert_eq!(engine.version(), 9);
        engine.import("test", vec![Bookmark::new("https://b.example")]).unwrap();
        assert_eq!(engine.cache().get("https://b.example").unwrap().unwrap().version, 10);
    }

    #[test]
    fn test_configured_separator_reaches_caches() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            tag_separator: '|',
            ..test_config(&temp)
        };
        let engine = Engine::open(config).unwrap();
        engine
            .import("test", vec![Bookmark::new("https://a.example").with_tags(["a|b", "c"])])
            .unwrap();

        let row = engine.cache().get("https://a.example").unwrap().unwrap();
        assert_eq!(row.tags, "|a--b|c|");
    }

    struct AlwaysLocked;

    impl LockChecker for AlwaysLocked {
        fn is_locked(&self, _path: &Path) -> StorageResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_locked_database_rejected() {
        let temp = TempDir::new().unwrap();
        drop(Engine::open(test_config(&temp)).unwrap());

        let err = match Engine::open_with_checker(test_config(&temp), &AlwaysLocked) {
            Ok(_) => panic!("expected a lock error"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::Locked { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_loads_and_persists_sources() {
        let temp = TempDir::new().unwrap();
        let source_path = temp.path().join("links.txt");
        std::fs::write(&source_path, "https://a.example rust\n").unwrap();

        let config = test_config(&temp);
        let engine = Engine::open(config.clone()).unwrap();
        let db_path = engine.db_path().to_path_buf();

        let mut registry = Registry::new();
        registry
            .add(module_spec(
                &SourceConfig {
                    id: "links".to_string(),
                    path: source_path.clone(),
                    format: SourceFormat::Text,
                    policy: Policy::Debounced,
                    poll_interval_secs: None,
                    reset_watch: false,
                },
                &config.scratch_dir(),
            ))
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(engine.run(registry, stop_rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&source_path, "https://a.example rust\nhttps://b.example\n").unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        stop_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let disk = Store::open_file("disk", &db_path).unwrap();
        assert_eq!(disk.count().unwrap(), 2);
        let row = disk.get("https://a.example").unwrap().unwrap();
        assert_eq!(row.module, "links");
        assert!(row.tag_set(',').contains("rust"));
    }
}
