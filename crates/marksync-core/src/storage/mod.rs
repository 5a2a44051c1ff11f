//! Storage layer
//!
//! Every tier of the pipeline is a [`Store`] sharing one SQLite schema.
//!
//! ## Tiers
//!
//! - **Buffer**: per-source staging store, rebuilt on every load cycle
//! - **Cache L1 / L2**: in-memory aggregation stores living as long as the process
//! - **Disk**: durable file, written from L2 by page-level backup
//!
//! Rows move between tiers with [`sync_to`] (merge) or [`copy_to`]
//! (page copy into an empty tier).

pub mod backup;
pub mod error;
pub mod lock;
pub mod query;
pub mod schema;
pub mod store;
pub mod sync;
pub mod upsert;

pub use backup::{copy_to, sync_from_disk, sync_to_disk};
pub use error::{StorageError, StorageResult};
pub use lock::{ensure_unlocked, open_snapshot, LockChecker, SqliteLockChecker};
pub use query::{Pagination, QueryResult};
pub use schema::{init_schema, migrate, SCHEMA_VERSION};
pub use store::{Store, StoreKind};
pub use sync::{sync_to, SyncReport};
pub use upsert::{TryInsert, UpsertOutcome};
