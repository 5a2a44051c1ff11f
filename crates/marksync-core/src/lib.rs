//! marksync Core Library
//!
//! This crate aggregates bookmarks from many independent sources into one
//! durable SQLite store, keeping it current as the sources change.
//!
//! # Architecture
//!
//! Bookmarks move through a chain of store tiers:
//!
//! ```text
//! source -> buffer -> cache L1 -> cache L2 -> disk
//! ```
//!
//! - **Buffer**: per-source staging store, rebuilt on every load cycle
//! - **Caches**: in-memory stores merged with a tag-union upsert
//! - **Disk**: written from L2 by page-level backup, debounced
//!
//! Every write carries a Lamport version and the local node id, and every
//! row an `xhsum` fingerprint used to skip no-op rewrites.
//!
//! # Quick Start
//!
//! ```text
//! let engine = Engine::open(Config::load()?)?;
//!
//! // One-shot import
//! engine.import("manual", vec![Bookmark::new("https://example.com")])?;
//! engine.flush()?;
//!
//! // Or keep watching the configured sources
//! engine.run(registry, stop_rx).await?;
//! ```
//!
//! # Modules
//!
//! - `engine`: Process context and source runner (main entry point)
//! - `loader`: The generic buffer/cascade load cycle
//! - `storage`: Store tiers, upsert, tier sync, backup, migrations
//! - `registry`: Source registration
//! - `watch`: File watching and event reduction
//! - `sources`: File-backed sources
//! - `config`: Application configuration

pub mod clock;
pub mod config;
pub mod debounce;
pub mod engine;
pub mod hash;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod poll;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod storage;
pub mod tags;
pub mod watch;

pub use clock::{LamportClock, Stamper};
pub use config::{Config, SourceConfig, SourceFormat};
pub use engine::Engine;
pub use loader::{LoadReport, Pipeline};
pub use models::{Bookmark, NodeId, RawBookmark, SyncNode};
pub use registry::{Fetcher, Loader, ModuleSpec, Policy, Producer, Registry, RegistryError};
pub use sources::FileSource;
pub use storage::{Pagination, QueryResult, StorageError, Store};
pub use tags::{Tags, DEFAULT_TAG_SEP};
pub use watch::{Watch, WatchOp};
