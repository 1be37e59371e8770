// ABOUTME: SQLite-backed storage for sites, pages, blocks, and snapshots.
// ABOUTME: Units of work are IMMEDIATE transactions so concurrent publishers serialize on the write lock.

use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pagesnap_core::{Block, Criteria, Page, Site, Snapshot};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use ulid::Ulid;

use crate::error::StoreError;
use crate::lookup;
use crate::store::{
    BlockStore, PageFilter, PageStore, SiteStore, SnapshotStore, Storage, UnitOfWork,
};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sites (
        site_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        host TEXT NOT NULL,
        enabled INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pages (
        page_id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL,
        name TEXT NOT NULL,
        title TEXT,
        url TEXT,
        route_name TEXT NOT NULL,
        page_alias TEXT,
        parent_id TEXT,
        target_id TEXT,
        enabled INTEGER NOT NULL,
        edited INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY (site_id) REFERENCES sites(site_id)
    );

    CREATE TABLE IF NOT EXISTS blocks (
        block_id TEXT PRIMARY KEY,
        page_id TEXT,
        parent_id TEXT,
        name TEXT NOT NULL,
        block_type TEXT NOT NULL,
        enabled INTEGER NOT NULL,
        position INTEGER NOT NULL,
        settings TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        FOREIGN KEY (page_id) REFERENCES pages(page_id)
    );

    CREATE INDEX IF NOT EXISTS blocks_page_position ON blocks(page_id, position);

    CREATE TABLE IF NOT EXISTS snapshots (
        snapshot_id TEXT PRIMARY KEY,
        page_id TEXT NOT NULL,
        site_id TEXT NOT NULL,
        name TEXT NOT NULL,
        url TEXT,
        route_name TEXT NOT NULL,
        page_alias TEXT,
        enabled INTEGER NOT NULL,
        content TEXT NOT NULL,
        publication_date_start INTEGER,
        publication_date_end INTEGER,
        created_at INTEGER NOT NULL,
        CHECK (
            publication_date_end IS NULL
            OR publication_date_start IS NULL
            OR publication_date_end >= publication_date_start
        ),
        FOREIGN KEY (page_id) REFERENCES pages(page_id)
    );

    CREATE INDEX IF NOT EXISTS snapshots_page_window
        ON snapshots(page_id, publication_date_end);
    CREATE INDEX IF NOT EXISTS snapshots_url ON snapshots(site_id, url);
    CREATE INDEX IF NOT EXISTS snapshots_route ON snapshots(site_id, route_name);

    CREATE TRIGGER IF NOT EXISTS snapshots_content_immutable
        BEFORE UPDATE OF content ON snapshots
        WHEN NEW.content IS NOT OLD.content
    BEGIN
        SELECT RAISE(ABORT, 'snapshot content is immutable');
    END;
";

pub(crate) const SNAPSHOT_COLUMNS: &str = "snapshot_id, page_id, site_id, name, url, route_name, \
     page_alias, enabled, content, publication_date_start, publication_date_end, created_at";

const PAGE_COLUMNS: &str = "page_id, site_id, name, title, url, route_name, page_alias, \
     parent_id, target_id, enabled, edited, created_at, updated_at";

const BLOCK_COLUMNS: &str = "block_id, page_id, parent_id, name, block_type, enabled, position, \
     settings, created_at, updated_at";

/// A SQLite database holding the live page tree and its snapshots.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path with the default busy timeout.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create a database. Lock waits longer than `busy_timeout`
    /// surface as `StoreError::Timeout`.
    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl Storage for Database {
    type Unit<'a> = SqliteUnit<'a>;

    fn begin(&mut self) -> Result<SqliteUnit<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteUnit { tx })
    }
}

/// A unit of work over one SQLite transaction. Dropping it rolls back.
pub struct SqliteUnit<'c> {
    tx: Transaction<'c>,
}

impl SqliteUnit<'_> {
    fn conn(&self) -> &Connection {
        &self.tx
    }
}

impl UnitOfWork for SqliteUnit<'_> {
    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}

/// Implements the store traits for a type exposing `conn()`.
macro_rules! impl_stores {
    ($ty:ty) => {
        impl SiteStore for $ty {
            fn find_sites(&self, ids: Option<&[Ulid]>) -> Result<Vec<Site>, StoreError> {
                find_sites(self.conn(), ids)
            }

            fn save_site(&self, site: &Site) -> Result<(), StoreError> {
                save_site(self.conn(), site)
            }
        }

        impl PageStore for $ty {
            fn find_pages(&self, filter: &PageFilter) -> Result<Vec<Page>, StoreError> {
                find_pages(self.conn(), filter)
            }

            fn save_page(&self, page: &Page) -> Result<(), StoreError> {
                save_page(self.conn(), page)
            }
        }

        impl BlockStore for $ty {
            fn load_flat_by_page(&self, page_id: &Ulid) -> Result<Vec<Block>, StoreError> {
                load_flat_by_page(self.conn(), page_id)
            }

            fn find_block(&self, block_id: &Ulid) -> Result<Option<Block>, StoreError> {
                find_block(self.conn(), block_id)
            }

            fn save_block(&self, block: &Block) -> Result<(), StoreError> {
                save_block(self.conn(), block)
            }

            fn update_position(
                &self,
                block_id: &Ulid,
                position: i64,
                parent_id: &Ulid,
                page_id: &Ulid,
            ) -> Result<bool, StoreError> {
                update_position(self.conn(), block_id, position, parent_id, page_id)
            }
        }

        impl SnapshotStore for $ty {
            fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
                save_snapshot(self.conn(), snapshot)
            }

            fn close_open_windows(
                &self,
                page_ids: &[Ulid],
                except: &[Ulid],
                at: DateTime<Utc>,
            ) -> Result<usize, StoreError> {
                close_open_windows(self.conn(), page_ids, except, at)
            }

            fn query_active(
                &self,
                criteria: &Criteria,
                at: DateTime<Utc>,
            ) -> Result<Option<Snapshot>, StoreError> {
                lookup::query_active(self.conn(), criteria, at)
            }

            fn delete_all_except(
                &self,
                page_id: &Ulid,
                keep: NonZeroUsize,
            ) -> Result<usize, StoreError> {
                delete_all_except(self.conn(), page_id, keep)
            }

            fn snapshots_for_page(&self, page_id: &Ulid) -> Result<Vec<Snapshot>, StoreError> {
                snapshots_for_page(self.conn(), page_id)
            }
        }
    };
}

impl_stores!(Database);
impl_stores!(SqliteUnit<'_>);

// ---------- sites ----------

fn find_sites(conn: &Connection, ids: Option<&[Ulid]>) -> Result<Vec<Site>, StoreError> {
    let mut sql = "SELECT site_id, name, host, enabled FROM sites".to_string();
    let mut values = Vec::new();
    if let Some(ids) = ids {
        sql.push_str(&format!(" WHERE site_id IN ({})", placeholders(ids.len())));
        values.extend(ids.iter().map(|id| Value::Text(id.to_string())));
    }
    sql.push_str(" ORDER BY name ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
        Ok(Site {
            site_id: ulid_at(row, 0)?,
            name: row.get(1)?,
            host: row.get(2)?,
            enabled: row.get(3)?,
        })
    })?;

    let mut sites = Vec::new();
    for row in rows {
        sites.push(row?);
    }
    Ok(sites)
}

fn save_site(conn: &Connection, site: &Site) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO sites (site_id, name, host, enabled)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(site_id) DO UPDATE SET
            name = excluded.name,
            host = excluded.host,
            enabled = excluded.enabled",
        params![site.site_id.to_string(), site.name, site.host, site.enabled],
    )?;
    Ok(())
}

// ---------- pages ----------

fn find_pages(conn: &Connection, filter: &PageFilter) -> Result<Vec<Page>, StoreError> {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    if let Some(site_id) = filter.site_id {
        clauses.push("site_id = ?");
        values.push(Value::Text(site_id.to_string()));
    }
    if let Some(page_id) = filter.page_id {
        clauses.push("page_id = ?");
        values.push(Value::Text(page_id.to_string()));
    }
    if let Some(edited) = filter.edited {
        clauses.push("edited = ?");
        values.push(Value::Integer(i64::from(edited)));
    }

    let mut sql = format!("SELECT {PAGE_COLUMNS} FROM pages");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY page_id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(values), page_from_row)?;

    let mut pages = Vec::new();
    for row in rows {
        pages.push(row?);
    }
    Ok(pages)
}

fn save_page(conn: &Connection, page: &Page) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO pages (page_id, site_id, name, title, url, route_name, page_alias,
                            parent_id, target_id, enabled, edited, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
         ON CONFLICT(page_id) DO UPDATE SET
            site_id = excluded.site_id,
            name = excluded.name,
            title = excluded.title,
            url = excluded.url,
            route_name = excluded.route_name,
            page_alias = excluded.page_alias,
            parent_id = excluded.parent_id,
            target_id = excluded.target_id,
            enabled = excluded.enabled,
            edited = excluded.edited,
            updated_at = excluded.updated_at",
        params![
            page.page_id.to_string(),
            page.site_id.to_string(),
            page.name,
            page.title,
            page.url,
            page.route_name,
            page.page_alias,
            page.parent_id.map(|id| id.to_string()),
            page.target_id.map(|id| id.to_string()),
            page.enabled,
            page.edited,
            micros(page.created_at),
            micros(page.updated_at),
        ],
    )?;
    Ok(())
}

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        page_id: ulid_at(row, 0)?,
        site_id: ulid_at(row, 1)?,
        name: row.get(2)?,
        title: row.get(3)?,
        url: row.get(4)?,
        route_name: row.get(5)?,
        page_alias: row.get(6)?,
        parent_id: opt_ulid_at(row, 7)?,
        target_id: opt_ulid_at(row, 8)?,
        enabled: row.get(9)?,
        edited: row.get(10)?,
        created_at: time_at(row, 11)?,
        updated_at: time_at(row, 12)?,
    })
}

// ---------- blocks ----------

fn load_flat_by_page(conn: &Connection, page_id: &Ulid) -> Result<Vec<Block>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BLOCK_COLUMNS} FROM blocks WHERE page_id = ?1 ORDER BY position ASC, block_id ASC"
    ))?;
    let rows = stmt.query_map(params![page_id.to_string()], block_from_row)?;

    let mut blocks = Vec::new();
    for row in rows {
        blocks.push(row?);
    }
    Ok(blocks)
}

fn find_block(conn: &Connection, block_id: &Ulid) -> Result<Option<Block>, StoreError> {
    let block = conn
        .query_row(
            &format!("SELECT {BLOCK_COLUMNS} FROM blocks WHERE block_id = ?1"),
            params![block_id.to_string()],
            block_from_row,
        )
        .optional()?;
    Ok(block)
}

fn save_block(conn: &Connection, block: &Block) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO blocks (block_id, page_id, parent_id, name, block_type, enabled, position,
                             settings, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(block_id) DO UPDATE SET
            page_id = excluded.page_id,
            parent_id = excluded.parent_id,
            name = excluded.name,
            block_type = excluded.block_type,
            enabled = excluded.enabled,
            position = excluded.position,
            settings = excluded.settings,
            updated_at = excluded.updated_at",
        params![
            block.block_id.to_string(),
            block.page_id.map(|id| id.to_string()),
            block.parent_id.map(|id| id.to_string()),
            block.name,
            block.block_type,
            block.enabled,
            block.position,
            serde_json::to_string(&block.settings)?,
            micros(block.created_at),
            micros(block.updated_at),
        ],
    )?;
    Ok(())
}

fn update_position(
    conn: &Connection,
    block_id: &Ulid,
    position: i64,
    parent_id: &Ulid,
    page_id: &Ulid,
) -> Result<bool, StoreError> {
    let changed = conn.execute(
        "UPDATE blocks SET position = ?1, parent_id = ?2, page_id = ?3, updated_at = ?4
         WHERE block_id = ?5",
        params![
            position,
            parent_id.to_string(),
            page_id.to_string(),
            micros(Utc::now()),
            block_id.to_string(),
        ],
    )?;
    Ok(changed > 0)
}

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<Block> {
    let settings: String = row.get(7)?;
    let settings = serde_json::from_str(&settings)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(Block {
        block_id: ulid_at(row, 0)?,
        page_id: opt_ulid_at(row, 1)?,
        parent_id: opt_ulid_at(row, 2)?,
        name: row.get(3)?,
        block_type: row.get(4)?,
        enabled: row.get(5)?,
        position: row.get(6)?,
        settings,
        created_at: time_at(row, 8)?,
        updated_at: time_at(row, 9)?,
    })
}

// ---------- snapshots ----------

fn save_snapshot(conn: &Connection, snapshot: &Snapshot) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO snapshots (snapshot_id, page_id, site_id, name, url, route_name, page_alias,
                                enabled, content, publication_date_start, publication_date_end,
                                created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(snapshot_id) DO UPDATE SET
            enabled = excluded.enabled,
            publication_date_start = excluded.publication_date_start,
            publication_date_end = excluded.publication_date_end",
        params![
            snapshot.snapshot_id.to_string(),
            snapshot.page_id.to_string(),
            snapshot.site_id.to_string(),
            snapshot.name,
            snapshot.url,
            snapshot.route_name,
            snapshot.page_alias,
            snapshot.enabled,
            snapshot.content,
            snapshot.publication_date_start.map(micros),
            snapshot.publication_date_end.map(micros),
            micros(snapshot.created_at),
        ],
    )?;
    Ok(())
}

fn close_open_windows(
    conn: &Connection,
    page_ids: &[Ulid],
    except: &[Ulid],
    at: DateTime<Utc>,
) -> Result<usize, StoreError> {
    if page_ids.is_empty() {
        return Ok(0);
    }

    // A window that starts after `at` is closed empty rather than inverted.
    let mut sql = format!(
        "UPDATE snapshots
         SET publication_date_end = max(?, COALESCE(publication_date_start, ?))
         WHERE publication_date_end IS NULL AND page_id IN ({})",
        placeholders(page_ids.len())
    );
    if !except.is_empty() {
        sql.push_str(&format!(
            " AND snapshot_id NOT IN ({})",
            placeholders(except.len())
        ));
    }

    let mut values = vec![Value::Integer(micros(at)), Value::Integer(micros(at))];
    values.extend(page_ids.iter().map(|id| Value::Text(id.to_string())));
    values.extend(except.iter().map(|id| Value::Text(id.to_string())));

    Ok(conn.execute(&sql, rusqlite::params_from_iter(values))?)
}

/// Delete the page's snapshots outside its `keep` most relevant, in one
/// statement. Relevance: open-ended first (activated before never-activated),
/// then most recently superseded.
fn delete_all_except(
    conn: &Connection,
    page_id: &Ulid,
    keep: NonZeroUsize,
) -> Result<usize, StoreError> {
    let keep = i64::try_from(keep.get()).unwrap_or(i64::MAX);
    let deleted = conn.execute(
        "DELETE FROM snapshots
         WHERE page_id = ?1
           AND snapshot_id NOT IN (
               SELECT snapshot_id FROM snapshots
               WHERE page_id = ?1
               ORDER BY publication_date_end IS NULL DESC,
                        publication_date_end DESC,
                        publication_date_start DESC,
                        snapshot_id DESC
               LIMIT ?2
           )",
        params![page_id.to_string(), keep],
    )?;
    Ok(deleted)
}

fn snapshots_for_page(conn: &Connection, page_id: &Ulid) -> Result<Vec<Snapshot>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE page_id = ?1
         ORDER BY created_at ASC, snapshot_id ASC"
    ))?;
    let rows = stmt.query_map(params![page_id.to_string()], snapshot_from_row)?;

    let mut snapshots = Vec::new();
    for row in rows {
        snapshots.push(row?);
    }
    Ok(snapshots)
}

pub(crate) fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        snapshot_id: ulid_at(row, 0)?,
        page_id: ulid_at(row, 1)?,
        site_id: ulid_at(row, 2)?,
        name: row.get(3)?,
        url: row.get(4)?,
        route_name: row.get(5)?,
        page_alias: row.get(6)?,
        enabled: row.get(7)?,
        content: row.get(8)?,
        publication_date_start: opt_time_at(row, 9)?,
        publication_date_end: opt_time_at(row, 10)?,
        created_at: time_at(row, 11)?,
    })
}

// ---------- column helpers ----------

pub(crate) fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn ulid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Ulid> {
    let raw: String = row.get(idx)?;
    raw.parse::<Ulid>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn opt_ulid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Ulid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<Ulid>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp out of range: {raw}").into(),
        )
    })
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<i64> = row.get(idx)?;
    raw.map(|micros| {
        DateTime::from_timestamp_micros(micros).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Integer,
                format!("timestamp out of range: {micros}").into(),
            )
        })
    })
    .transpose()
}
