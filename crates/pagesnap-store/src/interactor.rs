// ABOUTME: Editor-facing block operations: lookups, batched repositioning, container creation.
// ABOUTME: Repositioning runs in a single unit of work so a bad entry never leaves a half-moved page.

use std::collections::HashMap;

use chrono::Utc;
use pagesnap_core::Block;
use pagesnap_core::block::CONTAINER_TYPE;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::error::StoreError;
use crate::store::{BlockStore, Storage, UnitOfWork};

const DEFAULT_CONTAINER_NAME: &str = "No name defined";
const DEFAULT_CONTAINER_CODE: &str = "no code defined";

/// Errors that can occur in block interactor operations.
#[derive(Debug, Error)]
pub enum InteractorError {
    #[error("block not found: {0}")]
    BlockNotFound(Ulid),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// One entry of a drag-and-drop reorder as sent by an editor. Entries
/// lacking any field are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub block_id: Option<Ulid>,
    pub position: Option<i64>,
    pub parent_id: Option<Ulid>,
    pub page_id: Option<Ulid>,
}

/// Values for a new container block. Unset fields take defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub enabled: Option<bool>,
    pub page_id: Option<Ulid>,
    pub name: Option<String>,
    pub code: Option<String>,
    pub position: Option<i64>,
    pub parent_id: Option<Ulid>,
}

pub fn get_block<S: BlockStore>(store: &S, block_id: &Ulid) -> Result<Option<Block>, InteractorError> {
    Ok(store.find_block(block_id)?)
}

/// A page's blocks keyed by id.
pub fn blocks_by_id<S: BlockStore>(
    store: &S,
    page_id: &Ulid,
) -> Result<HashMap<Ulid, Block>, InteractorError> {
    Ok(store
        .load_flat_by_page(page_id)?
        .into_iter()
        .map(|block| (block.block_id, block))
        .collect())
}

/// Apply a batch of moves atomically. Returns the number of blocks moved.
pub fn save_blocks_position<S: Storage>(
    storage: &mut S,
    updates: &[PositionUpdate],
) -> Result<usize, InteractorError> {
    let unit = storage.begin()?;
    let mut moved = 0;

    for update in updates {
        let (Some(block_id), Some(position), Some(parent_id), Some(page_id)) =
            (update.block_id, update.position, update.parent_id, update.page_id)
        else {
            tracing::debug!("skipping incomplete position update {:?}", update);
            continue;
        };

        if !unit.update_position(&block_id, position, &parent_id, &page_id)? {
            return Err(InteractorError::BlockNotFound(block_id));
        }
        moved += 1;
    }

    unit.commit()?;
    tracing::info!("repositioned {} block(s)", moved);
    Ok(moved)
}

pub fn create_container<S: BlockStore>(
    store: &S,
    values: ContainerSpec,
) -> Result<Block, InteractorError> {
    create_container_with(store, values, |_| {})
}

/// Create a container block, letting `alter` adjust it before it is saved.
pub fn create_container_with<S, F>(
    store: &S,
    values: ContainerSpec,
    alter: F,
) -> Result<Block, InteractorError>
where
    S: BlockStore,
    F: FnOnce(&mut Block),
{
    let now = Utc::now();
    let name = values
        .name
        .or_else(|| values.code.clone())
        .unwrap_or_else(|| DEFAULT_CONTAINER_NAME.to_string());
    let code = values
        .code
        .unwrap_or_else(|| DEFAULT_CONTAINER_CODE.to_string());

    let mut block = Block {
        block_id: Ulid::new(),
        page_id: values.page_id,
        parent_id: values.parent_id,
        name,
        block_type: CONTAINER_TYPE.to_string(),
        enabled: values.enabled.unwrap_or(true),
        position: values.position.unwrap_or(1),
        settings: [("code".to_string(), serde_json::Value::String(code))]
            .into_iter()
            .collect(),
        created_at: now,
        updated_at: now,
    };
    alter(&mut block);

    store.save_block(&block)?;
    Ok(block)
}
