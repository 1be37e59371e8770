// ABOUTME: Bounds a page's snapshot history to its N most relevant snapshots.
// ABOUTME: Open-ended snapshots rank first, then the most recently superseded ones.

use std::num::NonZeroUsize;

use thiserror::Error;
use ulid::Ulid;

use crate::error::StoreError;
use crate::store::SnapshotStore;

/// Errors that can occur during snapshot cleanup.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("snapshots to keep must be a positive integer, {0} given")]
    InvalidCount(i64),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl RetentionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetentionError::Store(e) if e.is_retryable())
    }
}

/// Validate a retention count supplied by a caller.
pub fn keep_count(keep: i64) -> Result<NonZeroUsize, RetentionError> {
    usize::try_from(keep)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(RetentionError::InvalidCount(keep))
}

/// Delete all snapshots of `page_id` except the `keep` most relevant.
/// Validation happens before the store is touched. Returns rows deleted.
pub fn cleanup<S: SnapshotStore>(
    store: &S,
    page_id: &Ulid,
    keep: i64,
) -> Result<usize, RetentionError> {
    let keep = keep_count(keep)?;
    let deleted = store.delete_all_except(page_id, keep)?;
    if deleted > 0 {
        tracing::info!(
            "pruned {} snapshot(s) of page {}, kept at most {}",
            deleted,
            page_id,
            keep
        );
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activator::activate_in;
    use crate::sqlite::Database;
    use crate::store::{PageStore, SiteStore};
    use chrono::{Duration, Utc};
    use pagesnap_core::{BlockTree, Page, Site, Snapshot};

    fn seeded() -> (Database, Page) {
        let db = Database::open_in_memory().unwrap();
        let site = Site::new("Main".to_string(), "example.org".to_string());
        db.save_site(&site).unwrap();
        let page = Page::new(site.site_id, "Home".to_string(), "homepage".to_string());
        db.save_page(&page).unwrap();
        (db, page)
    }

    /// Publish `n` successive versions of the page, one minute apart.
    fn publish_history(db: &mut Database, page: &Page, n: i64) -> Vec<Snapshot> {
        let start = Utc::now() - Duration::hours(1);
        (0..n)
            .map(|i| {
                let mut batch =
                    vec![Snapshot::capture(page, &BlockTree::build(Vec::new()).unwrap()).unwrap()];
                activate_in(&mut *db, &mut batch, start + Duration::minutes(i)).unwrap();
                batch.remove(0)
            })
            .collect()
    }

    fn remaining(db: &Database, page: &Page) -> Vec<Ulid> {
        db.snapshots_for_page(&page.page_id)
            .unwrap()
            .into_iter()
            .map(|s| s.snapshot_id)
            .collect()
    }

    #[test]
    fn keeps_five_of_six_and_drops_oldest_superseded() {
        let (mut db, page) = seeded();
        let history = publish_history(&mut db, &page, 6);

        let deleted = cleanup(&db, &page.page_id, 5).unwrap();

        assert_eq!(deleted, 1);
        let left = remaining(&db, &page);
        assert_eq!(left.len(), 5);
        assert!(!left.contains(&history[0].snapshot_id));
    }

    #[test]
    fn active_snapshot_survives_keep_one() {
        let (mut db, page) = seeded();
        let history = publish_history(&mut db, &page, 4);

        cleanup(&db, &page.page_id, 1).unwrap();

        assert_eq!(remaining(&db, &page), vec![history[3].snapshot_id]);
    }

    #[test]
    fn activated_snapshot_outranks_never_activated_draft() {
        let (mut db, page) = seeded();
        let history = publish_history(&mut db, &page, 2);
        let draft = Snapshot::capture(&page, &BlockTree::build(Vec::new()).unwrap()).unwrap();
        db.save_snapshot(&draft).unwrap();

        cleanup(&db, &page.page_id, 1).unwrap();

        assert_eq!(remaining(&db, &page), vec![history[1].snapshot_id]);
    }

    #[test]
    fn keep_larger_than_history_deletes_nothing() {
        let (mut db, page) = seeded();
        publish_history(&mut db, &page, 3);

        assert_eq!(cleanup(&db, &page.page_id, 10).unwrap(), 0);
        assert_eq!(remaining(&db, &page).len(), 3);
    }

    #[test]
    fn non_positive_keep_is_rejected() {
        let (db, page) = seeded();
        for keep in [0, -3] {
            let err = cleanup(&db, &page.page_id, keep).unwrap_err();
            assert!(matches!(err, RetentionError::InvalidCount(k) if k == keep));
        }
    }

    #[test]
    fn other_pages_are_untouched() {
        let (mut db, page) = seeded();
        let other = Page::new(page.site_id, "About".to_string(), "about".to_string());
        db.save_page(&other).unwrap();
        publish_history(&mut db, &page, 3);
        publish_history(&mut db, &other, 3);

        cleanup(&db, &page.page_id, 1).unwrap();

        assert_eq!(remaining(&db, &page).len(), 1);
        assert_eq!(remaining(&db, &other).len(), 3);
    }
}
