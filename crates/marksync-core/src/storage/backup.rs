//! Page-level copies between store tiers
//!
//! Uses SQLite's online backup API rather than copying rows. All three
//! operations share one process-wide lock so only a single backup runs at
//! a time.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::backup::{Backup, Progress};
use rusqlite::DatabaseName;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::store::Store;

static BACKUP_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Pages copied per backup step
const PAGES_PER_STEP: i32 = 256;

/// Write the full contents of `store` to the database file at `path`
///
/// The destination file is created if missing and fully replaced
/// otherwise.
pub fn sync_to_disk(store: &Store, path: &Path) -> StorageResult<()> {
    let _guard = BACKUP_LOCK.lock();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let conn = store.conn();
    conn.backup(DatabaseName::Main, path, None)?;
    debug!(store = %store.name(), path = %path.display(), "Synced store to disk");
    Ok(())
}

/// Replace the contents of `store` with the database file at `path`
pub fn sync_from_disk(store: &Store, path: &Path) -> StorageResult<()> {
    let _guard = BACKUP_LOCK.lock();

    if !path.exists() {
        return Err(StorageError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let mut conn = store.conn();
    conn.restore(DatabaseName::Main, path, None::<fn(Progress)>)?;
    debug!(store = %store.name(), path = %path.display(), "Loaded store from disk");
    Ok(())
}

/// Copy every page of `src` into `dst`, replacing its contents
///
/// Meant for seeding an empty tier; use [`super::sync_to`] to merge into a
/// populated one.
pub fn copy_to(src: &Store, dst: &Store) -> StorageResult<()> {
    if std::ptr::eq(src, dst) {
        return Err(StorageError::InvalidStore(format!(
            "cannot copy store '{}' onto itself",
            src.name()
        )));
    }

    let _guard = BACKUP_LOCK.lock();

    let src_conn = src.conn();
    let mut dst_conn = dst.conn();
    let backup = Backup::new(&src_conn, &mut dst_conn)?;
    backup.run_to_completion(PAGES_PER_STEP, Duration::ZERO, None)?;

    debug!(src = %src.name(), dst = %dst.name(), "Copied store");
    Ok(())
}
