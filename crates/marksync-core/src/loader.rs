//! Generic load cycle
//!
//! Every source goes through the same steps, whatever produces its
//! bookmarks:
//!
//! 1. create a fresh in-memory buffer for the source
//! 2. upsert each produced bookmark into the buffer
//! 3. cascade the buffer into the L1 cache, then L1 into L2
//! 4. request a debounced disk sync
//!
//! The buffer is dropped at the end of the cycle.

use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Stamper;
use crate::debounce::BlockingJob;
use crate::models::Bookmark;
use crate::registry::Producer;
use crate::scheduler::SchedulerHandle;
use crate::storage::{copy_to, sync_to, StorageResult, Store, SyncReport, UpsertOutcome};

/// Outcome of one load cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub module: String,
    pub received: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Moves source output through the cache tiers
pub struct Pipeline {
    l1: Arc<Store>,
    l2: Arc<Store>,
    stamper: Stamper,
    scheduler: SchedulerHandle,
    // Held while cascading so two sources never both seed an empty tier
    cascade: Mutex<()>,
}

impl Pipeline {
    pub fn new(l1: Arc<Store>, l2: Arc<Store>, stamper: Stamper, scheduler: SchedulerHandle) -> Self {
        Self {
            l1,
            l2,
            stamper,
            scheduler,
            cascade: Mutex::new(()),
        }
    }

    pub fn l1(&self) -> &Arc<Store> {
        &self.l1
    }

    pub fn l2(&self) -> &Arc<Store> {
        &self.l2
    }

    pub fn stamper(&self) -> &Stamper {
        &self.stamper
    }

    /// Run a full load cycle for source `id`
    pub fn load_module(&self, id: &str, producer: &Producer) -> Result<LoadReport> {
        let bookmarks = producer
            .produce()
            .with_context(|| format!("Source '{}' failed to produce bookmarks", id))?;
        self.ingest(id, bookmarks)
    }

    /// Stage `bookmarks` for source `id` and cascade them into the caches
    ///
    /// A bookmark that fails to upsert is logged and skipped; the rest of
    /// the batch still goes through.
    pub fn ingest(&self, id: &str, bookmarks: Vec<Bookmark>) -> Result<LoadReport> {
        let mut report = LoadReport {
            module: id.to_string(),
            received: bookmarks.len(),
            ..Default::default()
        };

        let buffer = Store::open_memory(buffer_name(id))
            .with_context(|| format!("Failed to create buffer for source '{}'", id))?
            .with_tag_sep(self.l2.tag_sep());

        for mut bk in bookmarks {
            if bk.module.is_empty() {
                bk.module = id.to_string();
            }
            match buffer.upsert_bookmark(&bk, &self.stamper) {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated) => report.updated += 1,
                Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    warn!(module = %id, url = %bk.url, error = %e, "Failed to stage bookmark");
                    report.failed += 1;
                }
            }
        }

        self.sync_to_cache(&buffer)
            .with_context(|| format!("Failed to sync source '{}' into cache", id))?;

        info!(
            module = %id,
            received = report.received,
            staged = report.inserted + report.updated,
            failed = report.failed,
            "Loaded source"
        );
        Ok(report)
    }

    /// Cascade `buffer` into L1 and L1 into L2, then schedule a disk sync
    pub fn sync_to_cache(&self, buffer: &Store) -> StorageResult<()> {
        {
            let _guard = self.cascade.lock();
            let first = cascade(buffer, &self.l1, &self.stamper)?;
            let second = cascade(&self.l1, &self.l2, &self.stamper)?;
            debug!(
                buffer = %buffer.name(),
                l1_changed = first.changed(),
                l2_changed = second.changed(),
                "Cascaded buffer into caches"
            );
        }
        self.scheduler.schedule();
        Ok(())
    }

    /// Wrap a load cycle for `id` as a job for reducers and poll loops
    pub fn job(self: &Arc<Self>, id: &str, producer: &Producer) -> BlockingJob {
        let pipeline = Arc::clone(self);
        let id = id.to_string();
        let producer = producer.clone();
        Arc::new(move || pipeline.load_module(&id, &producer).map(|_| ()))
    }
}

/// Seed an empty tier with a page copy, merge into a populated one
fn cascade(src: &Store, dst: &Store, stamper: &Stamper) -> StorageResult<SyncReport> {
    if dst.is_empty()? {
        let rows = src.count()?;
        copy_to(src, dst)?;
        return Ok(SyncReport {
            inserted: rows,
            ..Default::default()
        });
    }
    sync_to(src, dst, stamper)
}

/// Unique name for one load cycle's buffer
fn buffer_name(id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("buffer_{}_{}", id, &suffix[..8])
}
