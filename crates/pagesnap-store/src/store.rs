// ABOUTME: Collaborator traits the snapshot engine consumes: sites, pages, blocks, snapshots.
// ABOUTME: A Storage hands out units of work that roll back unless explicitly committed.

use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use pagesnap_core::{Block, Criteria, Page, Site, Snapshot};
use ulid::Ulid;

use crate::error::StoreError;

/// Filter for page queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageFilter {
    pub site_id: Option<Ulid>,
    pub page_id: Option<Ulid>,
    pub edited: Option<bool>,
}

impl PageFilter {
    pub fn site(site_id: Ulid) -> Self {
        Self {
            site_id: Some(site_id),
            ..Self::default()
        }
    }

    pub fn page(page_id: Ulid) -> Self {
        Self {
            page_id: Some(page_id),
            ..Self::default()
        }
    }
}

pub trait SiteStore {
    /// Sites with the given ids, or every site when `ids` is `None`.
    fn find_sites(&self, ids: Option<&[Ulid]>) -> Result<Vec<Site>, StoreError>;
    fn save_site(&self, site: &Site) -> Result<(), StoreError>;
}

pub trait PageStore {
    fn find_pages(&self, filter: &PageFilter) -> Result<Vec<Page>, StoreError>;
    fn save_page(&self, page: &Page) -> Result<(), StoreError>;
}

/// Sibling positions are expected to be unique but are not enforced here;
/// an editor reorder may briefly write duplicates. Blocks sharing a position
/// load in block id order, and tree building logs a warning for them.
pub trait BlockStore {
    /// All blocks of a page ordered by position ascending, then block id.
    fn load_flat_by_page(&self, page_id: &Ulid) -> Result<Vec<Block>, StoreError>;
    fn find_block(&self, block_id: &Ulid) -> Result<Option<Block>, StoreError>;
    fn save_block(&self, block: &Block) -> Result<(), StoreError>;
    /// Move a block. Returns false when no such block exists.
    fn update_position(
        &self,
        block_id: &Ulid,
        position: i64,
        parent_id: &Ulid,
        page_id: &Ulid,
    ) -> Result<bool, StoreError>;
}

pub trait SnapshotStore {
    /// Insert a snapshot, or update the publication window and enabled
    /// flag of an existing one. Content is never rewritten.
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Set `publication_date_end = at` on every open-ended snapshot of
    /// `page_ids` that is not listed in `except`. Returns rows touched.
    fn close_open_windows(
        &self,
        page_ids: &[Ulid],
        except: &[Ulid],
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// The active snapshot matching `criteria` at instant `at`.
    fn query_active(
        &self,
        criteria: &Criteria,
        at: DateTime<Utc>,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Delete every snapshot of the page outside the `keep` most relevant.
    /// Returns rows deleted.
    fn delete_all_except(&self, page_id: &Ulid, keep: NonZeroUsize)
    -> Result<usize, StoreError>;

    fn snapshots_for_page(&self, page_id: &Ulid) -> Result<Vec<Snapshot>, StoreError>;
}

/// A transactional scope. Dropping it without `commit` rolls back.
pub trait UnitOfWork {
    fn commit(self) -> Result<(), StoreError>;
}

/// A storage backend able to open units of work.
pub trait Storage {
    type Unit<'a>: UnitOfWork + SiteStore + PageStore + BlockStore + SnapshotStore
    where
        Self: 'a;

    /// Begin a unit of work holding the backend's write lock, so units that
    /// touch the same page never interleave.
    fn begin(&mut self) -> Result<Self::Unit<'_>, StoreError>;
}
