// ABOUTME: Defines the Block struct, a positioned content unit belonging to a page.
// ABOUTME: Blocks reference their parent by id; the hierarchy itself lives in BlockTree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Block type used for layout containers created by the block interactor.
pub const CONTAINER_TYPE: &str = "container";

/// A content block. `position` orders siblings that share the same parent
/// on the same page, ascending. `block_type` is opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: Ulid,
    pub page_id: Option<Ulid>,
    pub parent_id: Option<Ulid>,
    pub name: String,
    pub block_type: String,
    pub enabled: bool,
    pub position: i64,
    pub settings: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    /// Create an enabled, settings-free block at the given position.
    pub fn new(page_id: Ulid, block_type: String, position: i64) -> Self {
        let now = Utc::now();
        Self {
            block_id: Ulid::new(),
            page_id: Some(page_id),
            parent_id: None,
            name: String::new(),
            block_type,
            enabled: true,
            position,
            settings: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn child_of(mut self, parent: &Block) -> Self {
        self.parent_id = Some(parent.block_id);
        self
    }

    pub fn with_setting(mut self, key: &str, value: serde_json::Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }
}
