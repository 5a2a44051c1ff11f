//! Detection of databases held under an exclusive lock
//!
//! Some programs keep their SQLite files locked for as long as they run.
//! Before opening such a file directly, callers check for the lock and
//! fall back to reading a private snapshot copy.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::error::{is_lock_error, StorageError, StorageResult};
use super::store::Store;

/// Something that can tell whether a database file is locked
pub trait LockChecker: Send + Sync {
    fn is_locked(&self, path: &Path) -> StorageResult<bool>;
}

/// Probes a file by attempting a read through SQLite itself
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteLockChecker;

impl LockChecker for SqliteLockChecker {
    fn is_locked(&self, path: &Path) -> StorageResult<bool> {
        if !path.exists() {
            return Err(StorageError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let read = conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        });

        match read {
            Ok(_) => Ok(false),
            Err(e) if is_lock_error(&e) => {
                debug!(path = %path.display(), "Database is locked");
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Fail with [`StorageError::Locked`] if `path` is locked
pub fn ensure_unlocked(checker: &dyn LockChecker, path: &Path) -> StorageResult<()> {
    if checker.is_locked(path)? {
        return Err(StorageError::Locked {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Copy a database (and its WAL, if present) into `scratch_dir` and open the copy
///
/// Used to read a file another process keeps locked.
pub fn open_snapshot(path: &Path, scratch_dir: &Path) -> StorageResult<Store> {
    let file_name = path
        .file_name()
        .ok_or_else(|| StorageError::InvalidStore(format!("not a file: {}", path.display())))?;

    std::fs::create_dir_all(scratch_dir).map_err(|source| StorageError::CreateDirectory {
        path: scratch_dir.to_path_buf(),
        source,
    })?;

    let copy = scratch_dir.join(file_name);
    std::fs::copy(path, &copy).map_err(|e| StorageError::from_io(e, copy.clone()))?;

    let wal = sidecar(path, "-wal");
    if wal.exists() {
        let wal_copy = sidecar(&copy, "-wal");
        std::fs::copy(&wal, &wal_copy).map_err(|e| StorageError::from_io(e, wal_copy.clone()))?;
    }

    debug!(src = %path.display(), copy = %copy.display(), "Opened snapshot copy");
    Store::open_file(format!("snapshot:{}", file_name.to_string_lossy()), &copy)
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
