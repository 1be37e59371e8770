// ABOUTME: Resolves lookup criteria to the snapshot that is active at a given instant.
// ABOUTME: Ties between overlapping windows go to the latest publication start.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pagesnap_core::{Criteria, CriteriaError, Snapshot};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

use crate::error::StoreError;
use crate::sqlite::{SNAPSHOT_COLUMNS, micros, snapshot_from_row};
use crate::store::SnapshotStore;

/// Errors that can occur during an active-snapshot lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Find the active snapshot for loosely-typed criteria, as carried by an
/// incoming request. Malformed criteria are rejected before the store is hit.
pub fn find_active<S: SnapshotStore>(
    store: &S,
    criteria: &BTreeMap<String, String>,
    at: DateTime<Utc>,
) -> Result<Option<Snapshot>, LookupError> {
    let criteria = Criteria::from_map(criteria)?;
    Ok(store.query_active(&criteria, at)?)
}

fn criteria_column(criteria: &Criteria) -> (&'static str, Value) {
    match criteria {
        Criteria::Page { page_id, .. } => ("page_id", Value::Text(page_id.to_string())),
        Criteria::Url { url, .. } => ("url", Value::Text(url.clone())),
        Criteria::RouteName { route_name, .. } => ("route_name", Value::Text(route_name.clone())),
        Criteria::PageAlias { page_alias, .. } => {
            ("page_alias", Value::Text(page_alias.clone()))
        }
        Criteria::Name { name, .. } => ("name", Value::Text(name.clone())),
    }
}

pub(crate) fn query_active(
    conn: &Connection,
    criteria: &Criteria,
    at: DateTime<Utc>,
) -> Result<Option<Snapshot>, StoreError> {
    let (column, key) = criteria_column(criteria);

    let mut sql = format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots
         WHERE enabled = 1
           AND publication_date_start <= ?
           AND (publication_date_end IS NULL OR publication_date_end >= ?)
           AND {column} = ?"
    );
    let mut values = vec![Value::Integer(micros(at)), Value::Integer(micros(at)), key];

    if let Some(site_id) = criteria.site_id() {
        sql.push_str(" AND site_id = ?");
        values.push(Value::Text(site_id.to_string()));
    }
    sql.push_str(" ORDER BY publication_date_start DESC, snapshot_id DESC LIMIT 1");

    let snapshot = conn
        .query_row(&sql, rusqlite::params_from_iter(values), snapshot_from_row)
        .optional()?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::Database;
    use crate::store::{PageStore, SiteStore};
    use chrono::Duration;
    use pagesnap_core::{BlockTree, Page, Site};
    use ulid::Ulid;

    struct Fixture {
        db: Database,
        site: Site,
        page: Page,
    }

    fn fixture() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let site = Site::new("Main".to_string(), "example.org".to_string());
        db.save_site(&site).unwrap();
        let page = Page::new(site.site_id, "About us".to_string(), "about".to_string())
            .with_url("/about")
            .with_alias("_about");
        db.save_page(&page).unwrap();
        Fixture { db, site, page }
    }

    fn published(
        f: &Fixture,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Snapshot {
        let mut snapshot =
            Snapshot::capture(&f.page, &BlockTree::build(Vec::new()).unwrap()).unwrap();
        snapshot.publication_date_start = Some(start);
        snapshot.publication_date_end = end;
        f.db.save_snapshot(&snapshot).unwrap();
        snapshot
    }

    fn criteria(pairs: &[(&str, String)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn finds_by_every_supported_key() {
        let f = fixture();
        let now = Utc::now();
        let snapshot = published(&f, now - Duration::minutes(1), None);

        for pairs in [
            vec![
                ("site", f.site.site_id.to_string()),
                ("pageId", f.page.page_id.to_string()),
            ],
            vec![("url", "/about".to_string())],
            vec![("routeName", "about".to_string())],
            vec![("pageAlias", "_about".to_string())],
            vec![("name", "About us".to_string())],
        ] {
            let found = find_active(&f.db, &criteria(&pairs), now).unwrap();
            assert_eq!(
                found.map(|s| s.snapshot_id),
                Some(snapshot.snapshot_id),
                "lookup by {:?}",
                pairs
            );
        }
    }

    #[test]
    fn unsupported_criteria_are_rejected() {
        let f = fixture();
        let err = find_active(&f.db, &criteria(&[("slug", "about".to_string())]), Utc::now())
            .unwrap_err();
        assert!(matches!(err, LookupError::Criteria(CriteriaError::Unsupported)));
    }

    #[test]
    fn window_bounds_are_respected() {
        let f = fixture();
        let now = Utc::now();
        published(&f, now - Duration::hours(2), Some(now - Duration::hours(1)));
        published(&f, now + Duration::hours(1), None);

        let by_url = Criteria::Url {
            site_id: None,
            url: "/about".to_string(),
        };
        assert!(f.db.query_active(&by_url, now).unwrap().is_none());
        assert!(
            f.db.query_active(&by_url, now - Duration::minutes(90))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn disabled_snapshots_are_never_active() {
        let f = fixture();
        let now = Utc::now();
        let mut snapshot = published(&f, now - Duration::minutes(1), None);
        snapshot.enabled = false;
        f.db.save_snapshot(&snapshot).unwrap();

        let by_page = Criteria::Page {
            site_id: None,
            page_id: f.page.page_id,
        };
        assert!(f.db.query_active(&by_page, now).unwrap().is_none());
    }

    #[test]
    fn overlap_resolves_to_latest_start() {
        let f = fixture();
        let now = Utc::now();
        // At the cut-over instant the superseded window's inclusive end
        // and the new window's start coincide.
        published(&f, now - Duration::hours(1), Some(now));
        let newer = published(&f, now, None);

        let by_route = Criteria::RouteName {
            site_id: Some(f.site.site_id),
            route_name: "about".to_string(),
        };
        let found = f.db.query_active(&by_route, now).unwrap().unwrap();
        assert_eq!(found.snapshot_id, newer.snapshot_id);
    }

    #[test]
    fn other_site_does_not_match() {
        let f = fixture();
        let now = Utc::now();
        published(&f, now - Duration::minutes(1), None);

        let by_url = Criteria::Url {
            site_id: Some(Ulid::new()),
            url: "/about".to_string(),
        };
        assert!(f.db.query_active(&by_url, now).unwrap().is_none());
    }
}
