// ABOUTME: Turns a live page and its stored blocks into a new, not yet active snapshot.
// ABOUTME: Block trees are memoized in a caller-owned cache that lives for one call chain.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use pagesnap_core::{BlockTree, Page, Snapshot, SnapshotContentError, TreeError};
use thiserror::Error;
use ulid::Ulid;

use crate::error::StoreError;
use crate::store::BlockStore;

/// Errors that can occur while capturing a page into a snapshot.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("block tree of page {page_id} is incomplete: {source}")]
    Tree {
        page_id: Ulid,
        #[source]
        source: TreeError,
    },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("content error: {0}")]
    Content(#[from] SnapshotContentError),
}

impl TransformError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransformError::Store(e) if e.is_retryable())
    }
}

/// Loaded block trees keyed by page id. Owned by the caller so that nothing
/// outlives the request or transaction it was loaded in.
#[derive(Debug, Default)]
pub struct BlockCache {
    trees: HashMap<Ulid, BlockTree>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a page's block tree, reusing an earlier load from this cache.
    pub fn load<S: BlockStore>(
        &mut self,
        store: &S,
        page_id: &Ulid,
    ) -> Result<&BlockTree, TransformError> {
        match self.trees.entry(*page_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let blocks = store.load_flat_by_page(page_id)?;
                let tree = BlockTree::build(blocks).map_err(|source| TransformError::Tree {
                    page_id: *page_id,
                    source,
                })?;
                tracing::debug!("loaded {} blocks for page {}", tree.len(), page_id);
                Ok(entry.insert(tree))
            }
        }
    }

    /// Forget a page's tree, e.g. after its blocks were moved.
    pub fn invalidate(&mut self, page_id: &Ulid) {
        self.trees.remove(page_id);
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Capture `page` into a new snapshot. The snapshot is not persisted and
/// has no publication window yet.
pub fn create<S: BlockStore>(
    store: &S,
    cache: &mut BlockCache,
    page: &Page,
) -> Result<Snapshot, TransformError> {
    let tree = cache.load(store, &page.page_id)?;
    Ok(Snapshot::capture(page, tree)?)
}
