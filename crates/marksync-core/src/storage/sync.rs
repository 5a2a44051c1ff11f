//! Tier-to-tier synchronization
//!
//! `sync_to` drains every row of a source store into a destination store.
//! New URLs are copied verbatim, keeping their version and node. URLs
//! already present in the destination are merged: tags are unioned and
//! the row is rewritten only when the merged fingerprint changed.

use tracing::{debug, trace};

use super::error::{StorageError, StorageResult};
use super::store::{read_all, Store};
use super::upsert::{read_state, try_insert, write_merged, Merged, NewRow, TryInsert};
use crate::clock::Stamper;
use crate::models::RawBookmark;

/// Counts of what a sync did to the destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: usize,
    pub merged: usize,
    pub unchanged: usize,
}

impl SyncReport {
    /// True when the destination was modified
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.merged > 0
    }
}

/// Synchronize every row of `src` into `dst`
///
/// Afterwards `dst` holds the union of both stores' rows, and for every
/// URL the union of both tag sets. The source is read in full before the
/// destination is locked, so the two store locks are never held together.
pub fn sync_to(src: &Store, dst: &Store, stamper: &Stamper) -> StorageResult<SyncReport> {
    if std::ptr::eq(src, dst) {
        return Err(StorageError::InvalidStore(format!(
            "cannot sync store '{}' into itself",
            src.name()
        )));
    }
    if src.tag_sep() != dst.tag_sep() {
        return Err(StorageError::InvalidStore(format!(
            "stores '{}' and '{}' use different tag separators",
            src.name(),
            dst.name()
        )));
    }
    let sep = dst.tag_sep();

    let rows = {
        let conn = src.conn();
        read_all(&conn)?
    };

    let mut report = SyncReport::default();
    if rows.is_empty() {
        return Ok(report);
    }

    let mut conn = dst.conn();

    // First pass: bulk insert, collecting URL conflicts
    let mut conflicts: Vec<&RawBookmark> = Vec::new();
    {
        let tx = conn.transaction()?;
        for row in &rows {
            let outcome = try_insert(
                &tx,
                &NewRow {
                    url: &row.url,
                    title: &row.title,
                    tags: &row.tags,
                    desc: &row.desc,
                    modified: row.modified,
                    flags: row.flags,
                    module: &row.module,
                    xhsum: &row.xhsum,
                    version: row.version,
                    node_id: row.node_id,
                },
            )?;
            match outcome {
                TryInsert::Inserted => report.inserted += 1,
                TryInsert::Conflict => conflicts.push(row),
            }
        }
        tx.commit()?;
    }

    // Second pass: merge conflicting rows
    if !conflicts.is_empty() {
        let tx = conn.transaction()?;
        for row in conflicts {
            let stored = read_state(&tx, &row.url, sep)?;
            let merged = Merged::of(&row.url, &stored, &row.title, &row.tag_set(sep), &row.desc);

            if !merged.changes(&stored) {
                report.unchanged += 1;
                continue;
            }

            let version = stamper.tick(row.version);
            trace!(
                src = %src.name(),
                dst = %dst.name(),
                url = %row.url,
                version,
                "Merging bookmark"
            );
            write_merged(&tx, &row.url, &merged, version, stamper.node_id())?;
            report.merged += 1;
        }
        tx.commit()?;
    }

    debug!(
        src = %src.name(),
        dst = %dst.name(),
        inserted = report.inserted,
        merged = report.merged,
        unchanged = report.unchanged,
        "Synced store"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LamportClock;
    use crate::models::{Bookmark, NodeId};
    use std::sync::Arc;

    fn stamper() -> Stamper {
        Stamper::new(Arc::new(LamportClock::new(0)), NodeId::new())
    }

    fn put(store: &Store, stamper: &Stamper, url: &str, tags: &[&str]) {
        let bk = Bookmark::new(url)
            .with_title("Title")
            .with_tags(tags.iter().copied());
        store.upsert_bookmark(&bk, stamper).unwrap();
    }

    #[test]
    fn test_sync_into_empty_copies_rows() {
        let stamper = stamper();
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap();
        put(&src, &stamper, "https://a.example", &["x"]);
        put(&src, &stamper, "https://b.example", &["y"]);

        let report = sync_to(&src, &dst, &stamper).unwrap();
        assert_eq!(report.inserted, 2);
        assert!(report.changed());

        let a_src = src.get("https://a.example").unwrap().unwrap();
        let a_dst = dst.get("https://a.example").unwrap().unwrap();
        assert_eq!(a_src.version, a_dst.version);
        assert_eq!(a_src.xhsum, a_dst.xhsum);
        assert_eq!(a_src.node_id, a_dst.node_id);
    }

    #[test]
    fn test_sync_merges_tags() {
        let stamper = stamper();
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap();
        put(&dst, &stamper, "https://a.example", &["user-tag"]);
        put(&src, &stamper, "https://a.example", &["browser"]);
        let before = dst.get("https://a.example").unwrap().unwrap();

        let report = sync_to(&src, &dst, &stamper).unwrap();
        assert_eq!(report.merged, 1);

        let after = dst.get("https://a.example").unwrap().unwrap();
        assert_eq!(after.tags, ",browser,user-tag,");
        assert!(after.version > before.version);
        assert_ne!(after.xhsum, before.xhsum);
    }

    #[test]
    fn test_sync_is_monotonic() {
        let stamper = stamper();
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap();
        put(&dst, &stamper, "https://a.example", &["x", "y"]);
        put(&dst, &stamper, "https://only-dst.example", &[]);
        put(&src, &stamper, "https://a.example", &["z"]);
        put(&src, &stamper, "https://only-src.example", &[]);

        sync_to(&src, &dst, &stamper).unwrap();

        assert_eq!(dst.count().unwrap(), 3);
        let tags = dst.get("https://a.example").unwrap().unwrap().tag_set(',');
        for tag in ["x", "y", "z"] {
            assert!(tags.contains(tag));
        }
    }

    #[test]
    fn test_sync_keeps_stored_title_when_source_is_untitled() {
        let stamper = stamper();
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap();
        put(&dst, &stamper, "https://a.example", &["x"]);
        put(&dst, &stamper, "https://b.example", &["keep"]);
        src.upsert_bookmark(
            &Bookmark::new("https://a.example").with_tags(["y"]),
            &stamper,
        )
        .unwrap();
        src.upsert_bookmark(
            &Bookmark::new("https://b.example").with_desc("from source"),
            &stamper,
        )
        .unwrap();
        let before_a = dst.get("https://a.example").unwrap().unwrap();
        let before_b = dst.get("https://b.example").unwrap().unwrap();

        let report = sync_to(&src, &dst, &stamper).unwrap();
        assert_eq!(report.merged, 2);

        let a = dst.get("https://a.example").unwrap().unwrap();
        assert_eq!(a.title, "Title");
        assert_eq!(a.tags, ",x,y,");
        assert!(a.version > before_a.version);

        let b = dst.get("https://b.example").unwrap().unwrap();
        assert_eq!(b.title, "Title");
        assert_eq!(b.desc, "from source");
        assert!(b.tag_set(',').is_superset(&before_b.tag_set(',')));
        assert!(b.version > before_b.version);

        // The source rows are left alone
        assert!(src.get("https://a.example").unwrap().unwrap().title.is_empty());
    }

    #[test]
    fn test_sync_rejects_mismatched_separators() {
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap().with_tag_sep('|');
        let err = sync_to(&src, &dst, &stamper()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidStore(_)));
    }

    #[test]
    fn test_repeated_sync_is_a_noop() {
        let stamper = stamper();
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap();
        put(&src, &stamper, "https://a.example", &["x"]);

        sync_to(&src, &dst, &stamper).unwrap();
        let before = dst.all().unwrap();

        let report = sync_to(&src, &dst, &stamper).unwrap();
        assert_eq!(report.unchanged, 1);
        assert!(!report.changed());
        assert_eq!(dst.all().unwrap(), before);
    }

    #[test]
    fn test_sync_into_self_is_rejected() {
        let store = Store::open_memory("cache").unwrap();
        let err = sync_to(&store, &store, &stamper()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidStore(_)));
    }

    #[test]
    fn test_sync_empty_source() {
        let src = Store::open_memory("src").unwrap();
        let dst = Store::open_memory("dst").unwrap();
        assert_eq!(sync_to(&src, &dst, &stamper()).unwrap(), SyncReport::default());
    }
}
