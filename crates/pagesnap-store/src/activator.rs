// ABOUTME: Cuts over the active snapshot of one or more pages at a single instant.
// ABOUTME: Opens the new windows and closes the superseded ones inside the caller's unit of work.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use pagesnap_core::Snapshot;
use thiserror::Error;
use ulid::Ulid;

use crate::error::StoreError;
use crate::store::{SnapshotStore, Storage, UnitOfWork};

/// Errors that can occur while activating snapshots. The surrounding unit
/// of work is rolled back, so no partial activation is ever visible.
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("page {0} appears more than once in the activation batch")]
    DuplicatePage(Ulid),

    #[error("activation failed: {0}")]
    Store(#[from] StoreError),
}

impl ActivationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ActivationError::DuplicatePage(_) => false,
            ActivationError::Store(e) => e.is_retryable(),
        }
    }
}

/// Activate `snapshots` at `at` within an open unit of work.
///
/// Every snapshot in the batch gets the window `[at, open)`; every other
/// open-ended snapshot of the same pages is closed at exactly `at`. Using
/// one instant for both halves leaves no gap and no overlap beyond the
/// shared boundary. Returns the number of superseded snapshots.
///
/// A batch may hold at most one snapshot per page; a repeated page is
/// rejected before anything is written. An empty batch is a no-op.
pub fn activate<S: SnapshotStore>(
    store: &S,
    snapshots: &mut [Snapshot],
    at: DateTime<Utc>,
) -> Result<usize, ActivationError> {
    if snapshots.is_empty() {
        return Ok(0);
    }

    let mut page_ids = BTreeSet::new();
    for snapshot in snapshots.iter() {
        if !page_ids.insert(snapshot.page_id) {
            return Err(ActivationError::DuplicatePage(snapshot.page_id));
        }
    }

    let mut snapshot_ids = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots.iter_mut() {
        snapshot.publication_date_start = Some(at);
        snapshot.publication_date_end = None;
        store.save_snapshot(snapshot)?;
        snapshot_ids.push(snapshot.snapshot_id);
    }

    let page_ids: Vec<Ulid> = page_ids.into_iter().collect();
    let superseded = store.close_open_windows(&page_ids, &snapshot_ids, at)?;

    tracing::info!(
        "activated {} snapshot(s) across {} page(s), superseded {}",
        snapshot_ids.len(),
        page_ids.len(),
        superseded
    );
    Ok(superseded)
}

/// Activate `snapshots` in a unit of work of their own.
pub fn activate_in<S: Storage>(
    storage: &mut S,
    snapshots: &mut [Snapshot],
    at: DateTime<Utc>,
) -> Result<usize, ActivationError> {
    let unit = storage.begin()?;
    let superseded = activate(&unit, snapshots, at)?;
    unit.commit()?;
    Ok(superseded)
}
