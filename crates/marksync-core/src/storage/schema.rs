//! SQLite schema and forward-only migrations
//!
//! Every store tier shares the same schema. Bookmarks live in
//! `gskbookmarks`; a `bookmarks` view with INSTEAD OF triggers keeps
//! single-table consumers working against it.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use super::error::{StorageError, StorageResult};
use crate::hash;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 3;

const CREATE_BOOKMARKS_V3: &str = r#"
    CREATE TABLE IF NOT EXISTS gskbookmarks (
        id INTEGER PRIMARY KEY,
        URL TEXT NOT NULL UNIQUE,
        metadata TEXT DEFAULT '',
        tags TEXT DEFAULT '',
        desc TEXT DEFAULT '',
        modified INTEGER DEFAULT (strftime('%s')),
        flags INTEGER DEFAULT 0,
        module TEXT DEFAULT '',
        xhsum TEXT DEFAULT '',
        version INTEGER DEFAULT 0,
        node_id BLOB
    );
"#;

const CREATE_SYNC_NODES: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_nodes (
        ordinal INTEGER PRIMARY KEY,
        node_id BLOB NOT NULL UNIQUE,
        version INTEGER NOT NULL
    );
"#;

const CREATE_SCHEMA_VERSION: &str = r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
"#;

// Compatibility view over gskbookmarks for single-table consumers
const CREATE_COMPAT_VIEW: &str = r#"
    CREATE VIEW IF NOT EXISTS bookmarks AS
        SELECT id, URL, metadata, tags, desc, flags
        FROM gskbookmarks;

    CREATE TRIGGER IF NOT EXISTS bookmarks_insert
    INSTEAD OF INSERT ON bookmarks
    BEGIN
        INSERT INTO gskbookmarks (URL, metadata, tags, desc, modified, flags, module)
        VALUES (
            new.URL,
            COALESCE(new.metadata, ''),
            COALESCE(new.tags, ''),
            COALESCE(new.desc, ''),
            strftime('%s'),
            COALESCE(new.flags, 0),
            'buku'
        );
    END;

    CREATE TRIGGER IF NOT EXISTS bookmarks_update
    INSTEAD OF UPDATE ON bookmarks
    BEGIN
        UPDATE gskbookmarks
        SET
            URL = COALESCE(new.URL, old.URL),
            metadata = COALESCE(new.metadata, old.metadata),
            tags = COALESCE(new.tags, old.tags),
            desc = COALESCE(new.desc, old.desc),
            modified = strftime('%s'),
            flags = COALESCE(new.flags, old.flags)
        WHERE id = old.id;
    END;
"#;

const DROP_COMPAT_VIEW: &str = r#"
    DROP TRIGGER IF EXISTS bookmarks_insert;
    DROP TRIGGER IF EXISTS bookmarks_update;
    DROP VIEW IF EXISTS bookmarks;
"#;

/// Initialize a fresh store with the current schema
///
/// Safe to call on a store that is already at the current version.
pub fn init_schema(conn: &Connection) -> StorageResult<()> {
    hash::register_sql_function(conn)?;
    conn.execute_batch(&format!(
        "BEGIN;{}{}{}{}COMMIT;",
        CREATE_SCHEMA_VERSION, CREATE_BOOKMARKS_V3, CREATE_SYNC_NODES, CREATE_COMPAT_VIEW
    ))?;

    if get_schema_version(conn)?.is_none() {
        set_schema_version(conn, SCHEMA_VERSION)?;
    }
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> StorageResult<Option<i32>> {
    if !table_exists(conn, "schema_version")? {
        return Ok(None);
    }
    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten();
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute_batch(CREATE_SCHEMA_VERSION)?;
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> StorageResult<bool> {
    let exists = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1")?
        .exists([name])?;
    Ok(exists)
}

/// Bring a store up to [`SCHEMA_VERSION`], returning the resulting version
///
/// Handles three starting points:
/// - an empty database, which gets the current schema directly
/// - an unversioned legacy database with a plain `bookmarks` table
/// - a versioned database older than the current version
///
/// A version newer than [`SCHEMA_VERSION`] is rejected.
pub fn migrate(conn: &Connection) -> StorageResult<i32> {
    hash::register_sql_function(conn)?;

    let mut version = match get_schema_version(conn)? {
        Some(v) => v,
        None if table_exists(conn, "bookmarks")? => {
            info!("Unversioned legacy schema detected, migrating to v1");
            migrate_legacy_to_v1(conn)?;
            1
        }
        None if table_exists(conn, "gskbookmarks")? => 1,
        None => {
            debug!("Empty database, creating schema v{}", SCHEMA_VERSION);
            init_schema(conn)?;
            return Ok(SCHEMA_VERSION);
        }
    };

    if version > SCHEMA_VERSION {
        return Err(StorageError::SchemaTooNew {
            found: version,
            current: SCHEMA_VERSION,
        });
    }

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            2 => migrate_v2_to_v3(conn)?,
            _ => {
                return Err(StorageError::InvalidStore(format!(
                    "no migration path from schema version {}",
                    version
                )))
            }
        }
        version += 1;
        set_schema_version(conn, version)?;
        info!("Migrated schema to v{}", version);
    }

    Ok(version)
}

fn migrate_legacy_to_v1(conn: &Connection) -> StorageResult<()> {
    let legacy_columns = column_names(conn, "bookmarks")?;
    let pick = |col: &str, fallback: &str| {
        if legacy_columns.iter().any(|c| c.eq_ignore_ascii_case(col)) {
            col.to_string()
        } else {
            fallback.to_string()
        }
    };

    let copy = format!(
        "INSERT INTO gskbookmarks (URL, metadata, tags, desc, modified, flags, module)
         SELECT URL, {}, {}, {}, {}, {}, {} FROM bookmarks",
        pick("metadata", "''"),
        pick("tags", "''"),
        pick("desc", "''"),
        pick("modified", "strftime('%s')"),
        pick("flags", "0"),
        pick("module", "'buku'"),
    );

    conn.execute_batch(&format!(
        r#"
        BEGIN;
        CREATE TABLE gskbookmarks (
            id INTEGER PRIMARY KEY,
            URL TEXT NOT NULL UNIQUE,
            metadata TEXT DEFAULT '',
            tags TEXT DEFAULT '',
            desc TEXT DEFAULT '',
            modified INTEGER DEFAULT (strftime('%s')),
            flags INTEGER DEFAULT 0,
            module TEXT DEFAULT ''
        );
        {copy};
        DROP TABLE bookmarks;
        {view}
        {version_table}
        COMMIT;
        "#,
        copy = copy,
        view = CREATE_COMPAT_VIEW,
        version_table = CREATE_SCHEMA_VERSION,
    ))?;
    set_schema_version(conn, 1)
}

fn migrate_v1_to_v2(conn: &Connection) -> StorageResult<()> {
    debug!("Migrating schema to v2: adding xhsum");
    conn.execute_batch(&format!(
        r#"
        BEGIN;
        {drop_view}
        CREATE TABLE temp_gskbookmarks (
            id INTEGER PRIMARY KEY,
            URL TEXT NOT NULL UNIQUE,
            metadata TEXT DEFAULT '',
            tags TEXT DEFAULT '',
            desc TEXT DEFAULT '',
            modified INTEGER DEFAULT (strftime('%s')),
            flags INTEGER DEFAULT 0,
            module TEXT DEFAULT '',
            xhsum TEXT DEFAULT ''
        );
        INSERT INTO temp_gskbookmarks (id, URL, metadata, tags, desc, modified, flags, module, xhsum)
            SELECT id, URL, metadata, tags, desc, modified, flags, module,
                   xhsum(URL, metadata, tags, desc)
            FROM gskbookmarks;
        DROP TABLE gskbookmarks;
        ALTER TABLE temp_gskbookmarks RENAME TO gskbookmarks;
        {view}
        COMMIT;
        "#,
        drop_view = DROP_COMPAT_VIEW,
        view = CREATE_COMPAT_VIEW,
    ))?;
    Ok(())
}

fn migrate_v2_to_v3(conn: &Connection) -> StorageResult<()> {
    debug!("Migrating schema to v3: adding version and node_id");
    conn.execute_batch(&format!(
        r#"
        BEGIN;
        ALTER TABLE gskbookmarks ADD COLUMN version INTEGER DEFAULT 0;
        ALTER TABLE gskbookmarks ADD COLUMN node_id BLOB;
        {sync_nodes}
        UPDATE gskbookmarks SET version = id;
        COMMIT;
        "#,
        sync_nodes = CREATE_SYNC_NODES,
    ))?;
    Ok(())
}

fn column_names(conn: &Connection, table: &str) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type=?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_init_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables = names(&conn, "table");
        assert!(tables.contains(&"gskbookmarks".to_string()));
        assert!(tables.contains(&"sync_nodes".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));

        assert!(names(&conn, "view").contains(&"bookmarks".to_string()));
        let triggers = names(&conn, "trigger");
        assert!(triggers.contains(&"bookmarks_insert".to_string()));
        assert!(triggers.contains(&"bookmarks_update".to_string()));
    }

    #[test]
    fn test_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), None);

        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(migrate(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_compat_view_insert_and_update() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO bookmarks (URL, metadata, tags) VALUES ('https://a.example', 'A', ',x,')",
            [],
        )
        .unwrap();

        let module: String = conn
            .query_row("SELECT module FROM gskbookmarks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(module, "buku");

        conn.execute("UPDATE bookmarks SET metadata = 'B' WHERE URL = 'https://a.example'", [])
            .unwrap();
        let (title, tags): (String, String) = conn
            .query_row("SELECT metadata, tags FROM gskbookmarks", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(title, "B");
        assert_eq!(tags, ",x,");
    }

    #[test]
    fn test_migrate_legacy_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE bookmarks (
                id INTEGER PRIMARY KEY,
                URL TEXT NOT NULL UNIQUE,
                metadata TEXT DEFAULT '',
                tags TEXT DEFAULT ',',
                desc TEXT DEFAULT '',
                flags INTEGER DEFAULT 0
            );
            INSERT INTO bookmarks (URL, metadata, tags) VALUES ('https://a.example', 'A', ',x,');
            INSERT INTO bookmarks (URL, metadata, tags) VALUES ('https://b.example', 'B', ',y,');
            "#,
        )
        .unwrap();

        assert_eq!(migrate(&conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));

        let (xhsum, version): (String, i64) = conn
            .query_row(
                "SELECT xhsum, version FROM gskbookmarks WHERE URL = 'https://a.example'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(xhsum, hash::xhsum("https://a.example", "A", ",x,", ""));
        assert!(version > 0);

        // Legacy table replaced by the compatibility view
        assert!(names(&conn, "view").contains(&"bookmarks".to_string()));
        assert!(!names(&conn, "table").contains(&"bookmarks".to_string()));
    }

    #[test]
    fn test_migrate_v2_sets_version_from_id() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE schema_version (version INTEGER PRIMARY KEY);
            INSERT INTO schema_version VALUES (2);
            CREATE TABLE gskbookmarks (
                id INTEGER PRIMARY KEY,
                URL TEXT NOT NULL UNIQUE,
                metadata TEXT DEFAULT '',
                tags TEXT DEFAULT '',
                desc TEXT DEFAULT '',
                modified INTEGER DEFAULT (strftime('%s')),
                flags INTEGER DEFAULT 0,
                module TEXT DEFAULT '',
                xhsum TEXT DEFAULT ''
            );
            INSERT INTO gskbookmarks (id, URL) VALUES (4, 'https://a.example');
            INSERT INTO gskbookmarks (id, URL) VALUES (9, 'https://b.example');
            "#,
        )
        .unwrap();

        assert_eq!(migrate(&conn).unwrap(), 3);

        let versions: Vec<i64> = conn
            .prepare("SELECT version FROM gskbookmarks ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(versions, vec![4, 9]);
        assert!(names(&conn, "table").contains(&"sync_nodes".to_string()));
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute("UPDATE schema_version SET version = 42", []).unwrap();

        let err = migrate(&conn).unwrap_err();
        assert!(matches!(
            err,
            StorageError::SchemaTooNew {
                found: 42,
                current: SCHEMA_VERSION
            }
        ));
    }
}
