// ABOUTME: Page- and site-level create/cleanup workflows run under transactional boundaries.
// ABOUTME: Site-wide runs treat each page as an independent unit and report per-page outcomes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use pagesnap_core::Snapshot;
use thiserror::Error;
use ulid::Ulid;

use crate::activator::{self, ActivationError};
use crate::error::StoreError;
use crate::retention::{self, RetentionError};
use crate::store::{PageFilter, PageStore, Storage, UnitOfWork};
use crate::transformer::{self, BlockCache, TransformError};

/// Errors that can occur while processing a page or site.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("page not found: {0}")]
    PageNotFound(Ulid),

    #[error("transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("activation error: {0}")]
    Activation(#[from] ActivationError),

    #[error("retention error: {0}")]
    Retention(#[from] RetentionError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl ProcessError {
    /// Whether re-running the same page-scoped unit may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::PageNotFound(_) => false,
            ProcessError::Transform(e) => e.is_retryable(),
            ProcessError::Activation(e) => e.is_retryable(),
            ProcessError::Retention(e) => e.is_retryable(),
            ProcessError::Store(e) => e.is_retryable(),
        }
    }
}

/// Cooperative cancellation for site-wide batches. Checked between page
/// units only; a page already in flight always finishes or rolls back.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-page outcome of a site-wide run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub succeeded: Vec<Ulid>,
    pub failed: Vec<(Ulid, ProcessError)>,
    /// Pages not reached because the run was cancelled.
    pub skipped: Vec<Ulid>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Runs the snapshot workflows against a storage backend.
pub struct SnapshotProcessor<S> {
    storage: S,
}

impl<S: Storage> SnapshotProcessor<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Capture, persist, and activate a new snapshot of one page, clearing
    /// its `edited` flag, all in a single unit of work.
    ///
    /// The page is re-read inside the unit so a concurrent edit committed
    /// before the lock was taken is captured rather than overwritten.
    pub fn create_snapshot(&mut self, page_id: &Ulid) -> Result<Snapshot, ProcessError> {
        let unit = self.storage.begin()?;

        let mut page = unit
            .find_pages(&PageFilter::page(*page_id))?
            .into_iter()
            .next()
            .ok_or(ProcessError::PageNotFound(*page_id))?;

        let mut snapshot = transformer::create(&unit, &mut BlockCache::new(), &page)?;

        page.edited = false;
        unit.save_page(&page)?;
        activator::activate(&unit, std::slice::from_mut(&mut snapshot), Utc::now())?;

        unit.commit()?;
        tracing::info!("created snapshot {} for page {}", snapshot.snapshot_id, page_id);
        Ok(snapshot)
    }

    /// Create a snapshot for every page of a site. Each page commits or
    /// rolls back on its own; a failure is recorded and the run continues.
    pub fn create_snapshots(
        &mut self,
        site_id: &Ulid,
        cancel: &CancelToken,
    ) -> Result<BatchReport, ProcessError> {
        let page_ids = self.site_page_ids(site_id)?;
        tracing::info!("creating snapshots for {} page(s) of site {}", page_ids.len(), site_id);
        Ok(self.for_each_page(page_ids, cancel, |this, page_id| {
            this.create_snapshot(page_id).map(|_| ())
        }))
    }

    /// Prune one page's history to `keep` snapshots in its own unit of work.
    pub fn cleanup_snapshot(&mut self, page_id: &Ulid, keep: i64) -> Result<usize, ProcessError> {
        retention::keep_count(keep)?;

        let unit = self.storage.begin()?;
        let deleted = retention::cleanup(&unit, page_id, keep)?;
        unit.commit()?;
        Ok(deleted)
    }

    /// Prune every page of a site, one unit of work per page.
    pub fn cleanup_snapshots(
        &mut self,
        site_id: &Ulid,
        keep: i64,
        cancel: &CancelToken,
    ) -> Result<BatchReport, ProcessError> {
        retention::keep_count(keep)?;

        let page_ids = self.site_page_ids(site_id)?;
        tracing::info!(
            "cleaning up snapshots for {} page(s) of site {}, keeping {}",
            page_ids.len(),
            site_id,
            keep
        );
        Ok(self.for_each_page(page_ids, cancel, |this, page_id| {
            this.cleanup_snapshot(page_id, keep).map(|_| ())
        }))
    }

    fn site_page_ids(&mut self, site_id: &Ulid) -> Result<Vec<Ulid>, ProcessError> {
        let unit = self.storage.begin()?;
        let pages = unit.find_pages(&PageFilter::site(*site_id))?;
        unit.commit()?;
        Ok(pages.into_iter().map(|p| p.page_id).collect())
    }

    fn for_each_page<F>(&mut self, page_ids: Vec<Ulid>, cancel: &CancelToken, mut run: F) -> BatchReport
    where
        F: FnMut(&mut Self, &Ulid) -> Result<(), ProcessError>,
    {
        let mut report = BatchReport::default();
        let mut pending = page_ids.into_iter();

        for page_id in pending.by_ref() {
            if cancel.is_cancelled() {
                tracing::warn!("batch cancelled before page {}", page_id);
                report.skipped.push(page_id);
                break;
            }

            match run(self, &page_id) {
                Ok(()) => report.succeeded.push(page_id),
                Err(e) => {
                    tracing::error!("page {} failed: {}", page_id, e);
                    report.failed.push((page_id, e));
                }
            }
        }

        report.skipped.extend(pending);
        report
    }
}
