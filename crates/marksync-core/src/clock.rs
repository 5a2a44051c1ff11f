//! Lamport logical clock
//!
//! Every write to a store is stamped with a version drawn from this clock.
//! The clock never moves backwards.

use std::sync::Arc;

use parking_lot::RwLock;
use rusqlite::Connection;

use crate::models::NodeId;

/// Monotonic logical clock shared by every store in a process
#[derive(Debug, Default)]
pub struct LamportClock {
    value: RwLock<u64>,
}

impl LamportClock {
    pub fn new(initial: u64) -> Self {
        Self {
            value: RwLock::new(initial),
        }
    }

    /// Seed a clock from the highest version known to `conn`
    ///
    /// Both the bookmark rows and the versions recorded for sync nodes
    /// count, so a restarted clock never falls behind what was recorded.
    pub fn from_store(conn: &Connection) -> rusqlite::Result<Self> {
        let clock = Self::new(max_version(conn)?);
        clock.observe(max_node_version(conn)?);
        Ok(clock)
    }

    /// Current value without advancing
    pub fn current(&self) -> u64 {
        *self.value.read()
    }

    /// Advance for a local write and return the new value
    pub fn local_tick(&self) -> u64 {
        let mut value = self.value.write();
        *value += 1;
        *value
    }

    /// Advance past a version observed from another store or node
    ///
    /// Returns `max(local, peer) + 1`.
    pub fn tick(&self, peer: u64) -> u64 {
        let mut value = self.value.write();
        *value = (*value).max(peer) + 1;
        *value
    }

    /// Move the clock forward to at least `version` without ticking
    pub fn observe(&self, version: u64) {
        let mut value = self.value.write();
        if version > *value {
            *value = version;
        }
    }
}

/// The local node identity paired with the shared clock
///
/// Every write path takes one of these so rows are stamped with both the
/// version and the node that produced it.
#[derive(Debug, Clone)]
pub struct Stamper {
    clock: Arc<LamportClock>,
    node_id: NodeId,
}

impl Stamper {
    pub fn new(clock: Arc<LamportClock>, node_id: NodeId) -> Self {
        Self { clock, node_id }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn clock(&self) -> &Arc<LamportClock> {
        &self.clock
    }

    pub fn local_tick(&self) -> u64 {
        self.clock.local_tick()
    }

    pub fn tick(&self, peer: u64) -> u64 {
        self.clock.tick(peer)
    }
}

/// Highest version stored in the bookmark table, or 0 when empty
pub fn max_version(conn: &Connection) -> rusqlite::Result<u64> {
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM gskbookmarks",
        [],
        |row| row.get(0),
    )?;
    Ok(version.max(0) as u64)
}

/// Highest version recorded in `sync_nodes`, or 0 when empty
pub fn max_node_version(conn: &Connection) -> rusqlite::Result<u64> {
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM sync_nodes",
        [],
        |row| row.get(0),
    )?;
    Ok(version.max(0) as u64)
}
