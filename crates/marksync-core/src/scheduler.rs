//! Debounced disk-sync scheduler
//!
//! Any number of sync requests arriving within one debounce window are
//! coalesced into a single write of the terminal cache tier to disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Stamper;
use crate::debounce::{BlockingJob, Debouncer, Trigger};
use crate::storage::{sync_to_disk, Store};

/// Cloneable handle used to request a disk sync
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    trigger: Trigger<()>,
}

impl SchedulerHandle {
    /// Request a disk sync; returns immediately
    pub fn schedule(&self) {
        if !self.trigger.fire(()) {
            tracing::warn!("Disk sync requested after scheduler shut down");
        }
    }
}

/// Build a scheduler running `sink` once per burst of requests
pub fn scheduler(interval: Duration, sink: BlockingJob) -> (SchedulerHandle, Debouncer<()>) {
    let (trigger, debouncer) = Debouncer::new("disk-sync", interval, sink);
    (SchedulerHandle { trigger }, debouncer)
}

/// Sink writing `cache` to the database file at `path`
///
/// The local node and its current clock value are recorded in the cache
/// first, so the durable file always carries them.
pub fn disk_sink(cache: Arc<Store>, path: PathBuf, stamper: Stamper) -> BlockingJob {
    Arc::new(move || {
        let node = cache.node_at_or_insert(1, stamper.node_id())?;
        cache.record_node_version(node, stamper.clock().current())?;
        sync_to_disk(&cache, &path)?;
        Ok(())
    })
}
