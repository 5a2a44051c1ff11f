//! File watching
//!
//! A [`WatchDescriptor`] wraps a native notifier over one or more
//! [`Watch`] entries and turns matching file-system events into reloads of
//! a source, either directly or through a [`reducer`].

pub mod reducer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, trace, warn};

use crate::debounce::{BlockingJob, Trigger};

/// Capacity of the event channel between the notifier thread and the loop
const EVENT_CAPACITY: usize = 256;

/// Kinds of file-system operation a watch reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Create,
    Modify,
    Remove,
}

impl WatchOp {
    fn matches(&self, kind: &EventKind) -> bool {
        matches!(
            (self, kind),
            (WatchOp::Create, EventKind::Create(_))
                | (WatchOp::Modify, EventKind::Modify(_))
                | (WatchOp::Remove, EventKind::Remove(_))
        )
    }
}

/// One watched location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    /// Directory (or file) handed to the notifier
    pub path: PathBuf,
    /// Operations that count as a change
    pub ops: Vec<WatchOp>,
    /// File names that count as a change; empty means any
    pub names: Vec<String>,
    /// Re-arm the underlying watch after each matching event
    pub reset_watch: bool,
}

impl Watch {
    /// Watch a directory for creations and modifications of any file
    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ops: vec![WatchOp::Create, WatchOp::Modify],
            names: Vec::new(),
            reset_watch: false,
        }
    }

    /// Watch a single file through its parent directory
    ///
    /// Watching the directory survives editors and browsers that replace
    /// the file instead of writing it in place.
    pub fn file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let names = path
            .file_name()
            .map(|n| vec![n.to_string_lossy().into_owned()])
            .unwrap_or_default();

        Self {
            path: dir,
            ops: vec![WatchOp::Create, WatchOp::Modify],
            names,
            reset_watch: false,
        }
    }

    pub fn ops(mut self, ops: &[WatchOp]) -> Self {
        self.ops = ops.to_vec();
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn reset_watch(mut self, reset: bool) -> Self {
        self.reset_watch = reset;
        self
    }

    /// True if `event` is one of this watch's operations on one of its files
    pub fn matches(&self, event: &Event) -> bool {
        if !self.ops.iter().any(|op| op.matches(&event.kind)) {
            return false;
        }

        event.paths.iter().any(|p| {
            let under = p.starts_with(&self.path) || p.parent() == Some(self.path.as_path());
            let named = self.names.is_empty()
                || p
                    .file_name()
                    .map(|n| self.names.iter().any(|name| n == name.as_str()))
                    .unwrap_or(false);
            under && named
        })
    }
}

/// A native watcher over a set of watches, feeding an async channel
pub struct WatchDescriptor {
    watcher: RecommendedWatcher,
    watches: Vec<Watch>,
    rx: mpsc::Receiver<notify::Result<Event>>,
}

impl WatchDescriptor {
    pub fn new(watches: Vec<Watch>) -> Result<Self> {
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Dropped events are harmless: a full channel already holds a trigger
            let _ = tx.try_send(res);
        })
        .context("Failed to create file watcher")?;

        for w in &watches {
            watcher
                .watch(&w.path, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {:?}", w.path))?;
            debug!(path = %w.path.display(), "Watching path");
        }

        Ok(Self {
            watcher,
            watches,
            rx,
        })
    }

    /// Index of the first watch matching `event`
    pub fn matching(&self, event: &Event) -> Option<usize> {
        self.watches.iter().position(|w| w.matches(event))
    }

    /// Drop and re-create the native watch for entry `idx`
    fn rearm(&mut self, idx: usize) -> Result<()> {
        let path = &self.watches[idx].path;
        // The old watch may already be gone if the path was replaced
        let _ = self.watcher.unwatch(path);
        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to re-watch {:?}", path))?;
        trace!(path = %path.display(), "Re-armed watch");
        Ok(())
    }

    /// Receive the next raw event; `None` once the notifier is gone
    pub async fn next_event(&mut self) -> Option<notify::Result<Event>> {
        self.rx.recv().await
    }
}

/// How matching events reach the source
#[derive(Clone)]
pub enum Dispatch {
    /// Run the reload on its own blocking task for every event
    Direct(BlockingJob),
    /// Forward to a reducer that coalesces bursts
    Debounced(Trigger<()>),
}

/// Run the watch loop for one source until `stop` flips
///
/// Direct reloads still running when the loop stops are awaited before it
/// returns, so their writes land before the disk scheduler shuts down.
pub async fn run_watch_loop(
    id: String,
    mut descriptor: WatchDescriptor,
    dispatch: Dispatch,
    mut stop: watch::Receiver<bool>,
) {
    let mut reloads: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            Some(joined) = reloads.join_next(), if !reloads.is_empty() => {
                if let Err(e) = joined {
                    error!(module = %id, error = %e, "Reload task panicked");
                }
            }
            event = descriptor.next_event() => match event {
                None => break,
                Some(Err(e)) => warn!(module = %id, error = %e, "Watch error"),
                Some(Ok(event)) => {
                    let Some(idx) = descriptor.matching(&event) else {
                        continue;
                    };
                    trace!(module = %id, kind = ?event.kind, paths = ?event.paths, "Matched event");

                    if descriptor.watches[idx].reset_watch {
                        if let Err(e) = descriptor.rearm(idx) {
                            warn!(module = %id, error = %e, "Failed to reset watch");
                        }
                    }

                    match &dispatch {
                        Dispatch::Direct(job) => {
                            let job = job.clone();
                            let id = id.clone();
                            reloads.spawn_blocking(move || {
                                if let Err(e) = job() {
                                    error!(module = %id, error = %e, "Reload failed");
                                }
                            });
                        }
                        Dispatch::Debounced(trigger) => {
                            trigger.fire(());
                        }
                    }
                }
            },
        }
    }

    if !reloads.is_empty() {
        debug!(module = %id, pending = reloads.len(), "Waiting for running reloads");
    }
    while let Some(joined) = reloads.join_next().await {
        if let Err(e) = joined {
            error!(module = %id, error = %e, "Reload task panicked");
        }
    }
    debug!(module = %id, "Watch loop stopped");
}
