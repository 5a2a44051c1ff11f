//! Content fingerprint used for change detection
//!
//! The fingerprint is a non-cryptographic XXH64 hash of the observable
//! bookmark state. Collisions are tolerated: every write path re-reads
//! the stored row before mutating it.

use xxhash_rust::xxh64::xxh64;

/// Name of the SQL scalar function registered by [`register_sql_function`]
pub const SQL_FUNCTION: &str = "xhsum";

/// Compute the fingerprint of `url+title+tags+desc`
///
/// `tags` must be the wrapped storage encoding. The result is rendered
/// as a decimal string, which is how it is stored.
pub fn xhsum(url: &str, title: &str, tags: &str, desc: &str) -> String {
    let input = format!("{}+{}+{}+{}", url, title, tags, desc);
    xxh64(input.as_bytes(), 0).to_string()
}

/// Expose [`xhsum`] to SQL so migrations can backfill the column
pub fn register_sql_function(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    use rusqlite::functions::FunctionFlags;

    conn.create_scalar_function(
        SQL_FUNCTION,
        4,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let mut parts = [String::new(), String::new(), String::new(), String::new()];
            for (i, part) in parts.iter_mut().enumerate() {
                *part = ctx.get::<Option<String>>(i)?.unwrap_or_default();
            }
            Ok(xhsum(&parts[0], &parts[1], &parts[2], &parts[3]))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_deterministic() {
        let a = xhsum("https://example.com", "Example", ",a,b,", "desc");
        let b = xhsum("https://example.com", "Example", ",a,b,", "desc");
        assert_eq!(a, b);
        assert!(a.parse::<u64>().is_ok());
    }

    #[test]
    fn test_every_field_contributes() {
        let base = xhsum("u", "t", ",x,", "d");
        assert_ne!(base, xhsum("u2", "t", ",x,", "d"));
        assert_ne!(base, xhsum("u", "t2", ",x,", "d"));
        assert_ne!(base, xhsum("u", "t", ",x,y,", "d"));
        assert_ne!(base, xhsum("u", "t", ",x,", "d2"));
    }

    #[test]
    fn test_sql_function_matches_rust() {
        let conn = Connection::open_in_memory().unwrap();
        register_sql_function(&conn).unwrap();

        let from_sql: String = conn
            .query_row(
                "SELECT xhsum('https://example.com', 'Example', ',a,', NULL)",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_eq!(from_sql, xhsum("https://example.com", "Example", ",a,", ""));
    }
}
