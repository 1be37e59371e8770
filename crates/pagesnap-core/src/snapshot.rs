// ABOUTME: Defines the Snapshot row and the immutable SnapshotContent captured from a page.
// ABOUTME: Content is a nested copy of the block tree; reading it back goes through BlockTree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::block::Block;
use crate::model::Page;
use crate::tree::{BlockTree, NodeRef, TreeError};

/// Errors that can occur while decoding or materializing snapshot content.
#[derive(Debug, Error)]
pub enum SnapshotContentError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("block tree error: {0}")]
    Tree(#[from] TreeError),
}

/// A published, time-windowed capture of a page.
///
/// The routing fields are copied from the page so that lookups never need
/// to join back to live pages. `content` is written once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: Ulid,
    pub page_id: Ulid,
    pub site_id: Ulid,
    pub name: String,
    pub url: Option<String>,
    pub route_name: String,
    pub page_alias: Option<String>,
    pub enabled: bool,
    pub content: String,
    pub publication_date_start: Option<DateTime<Utc>>,
    /// `None` means open-ended: the most recent activation for the page.
    pub publication_date_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Capture a page and its block tree into a new, not yet activated snapshot.
    pub fn capture(page: &Page, tree: &BlockTree) -> Result<Self, SnapshotContentError> {
        let content = SnapshotContent::capture(page, tree);
        Ok(Self {
            snapshot_id: Ulid::new(),
            page_id: page.page_id,
            site_id: page.site_id,
            name: page.name.clone(),
            url: page.url.clone(),
            route_name: page.route_name.clone(),
            page_alias: page.page_alias.clone(),
            enabled: page.enabled,
            content: serde_json::to_string(&content)?,
            publication_date_start: None,
            publication_date_end: None,
            created_at: Utc::now(),
        })
    }

    /// True when the snapshot's window covers `at`. The end bound is
    /// inclusive, matching the lookup predicate used by the store.
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.enabled
            && self.publication_date_start.is_some_and(|start| start <= at)
            && self.publication_date_end.is_none_or(|end| end >= at)
    }

    pub fn decode_content(&self) -> Result<SnapshotContent, SnapshotContentError> {
        Ok(serde_json::from_str(&self.content)?)
    }

    /// Materialize the captured block hierarchy for read access.
    pub fn block_tree(&self) -> Result<BlockTree, SnapshotContentError> {
        Ok(BlockTree::build(self.decode_content()?.flatten())?)
    }
}

/// The serialized page captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotContent {
    pub page_id: Ulid,
    pub name: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub route_name: String,
    pub page_alias: Option<String>,
    pub parent_id: Option<Ulid>,
    pub target_id: Option<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub blocks: Vec<BlockContent>,
}

/// One captured block with its descendants nested in sibling order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockContent {
    pub id: Ulid,
    pub name: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub enabled: bool,
    pub position: i64,
    pub settings: BTreeMap<String, serde_json::Value>,
    pub parent_id: Option<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub blocks: Vec<BlockContent>,
}

impl SnapshotContent {
    /// Deep-copy the page and its tree. The result owns all of its data and
    /// depends only on the tree's current state.
    pub fn capture(page: &Page, tree: &BlockTree) -> Self {
        Self {
            page_id: page.page_id,
            name: page.name.clone(),
            title: page.title.clone(),
            url: page.url.clone(),
            route_name: page.route_name.clone(),
            page_alias: page.page_alias.clone(),
            parent_id: page.parent_id,
            target_id: page.target_id,
            created_at: page.created_at,
            updated_at: page.updated_at,
            blocks: tree.roots().map(BlockContent::capture).collect(),
        }
    }

    /// Flatten the nested blocks back into rows ordered by position, the
    /// same shape a block store returns.
    pub fn flatten(&self) -> Vec<Block> {
        let mut rows = Vec::new();
        let mut stack: Vec<&BlockContent> = self.blocks.iter().rev().collect();
        while let Some(content) = stack.pop() {
            rows.push(content.to_block(self.page_id));
            stack.extend(content.blocks.iter().rev());
        }
        // Stable: equal positions keep their captured sibling order.
        rows.sort_by_key(|b| b.position);
        rows
    }
}

impl BlockContent {
    fn capture(node: NodeRef<'_>) -> Self {
        let block = node.block();
        Self {
            id: block.block_id,
            name: block.name.clone(),
            block_type: block.block_type.clone(),
            enabled: block.enabled,
            position: block.position,
            settings: block.settings.clone(),
            parent_id: block.parent_id,
            created_at: block.created_at,
            updated_at: block.updated_at,
            blocks: node.children().map(BlockContent::capture).collect(),
        }
    }

    fn to_block(&self, page_id: Ulid) -> Block {
        Block {
            block_id: self.id,
            page_id: Some(page_id),
            parent_id: self.parent_id,
            name: self.name.clone(),
            block_type: self.block_type.clone(),
            enabled: self.enabled,
            position: self.position,
            settings: self.settings.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn page_with_tree() -> (Page, BlockTree, Vec<Block>) {
        let page = Page::new(Ulid::new(), "Home".to_string(), "homepage".to_string())
            .with_url("/");
        let page_id = page.page_id;
        let header = Block::new(page_id, "container".to_string(), 0)
            .with_setting("code", serde_json::json!("header"));
        let title = Block::new(page_id, "text".to_string(), 0)
            .child_of(&header)
            .with_setting("content", serde_json::json!("Welcome"));
        let logo = Block::new(page_id, "image".to_string(), 1).child_of(&header);
        let footer = Block::new(page_id, "container".to_string(), 1);
        let blocks = vec![header, title, footer, logo];
        let mut ordered = blocks.clone();
        ordered.sort_by_key(|b| b.position);
        let tree = BlockTree::build(ordered).unwrap();
        (page, tree, blocks)
    }

    #[test]
    fn capture_copies_routing_fields() {
        let (page, tree, _) = page_with_tree();
        let snapshot = Snapshot::capture(&page, &tree).unwrap();

        assert_eq!(snapshot.page_id, page.page_id);
        assert_eq!(snapshot.site_id, page.site_id);
        assert_eq!(snapshot.url.as_deref(), Some("/"));
        assert_eq!(snapshot.route_name, "homepage");
        assert!(snapshot.publication_date_start.is_none());
        assert!(snapshot.publication_date_end.is_none());
    }

    #[test]
    fn content_nests_children_under_parents() {
        let (page, tree, blocks) = page_with_tree();
        let content = SnapshotContent::capture(&page, &tree);

        assert_eq!(content.blocks.len(), 2);
        let header = &content.blocks[0];
        assert_eq!(header.id, blocks[0].block_id);
        assert_eq!(header.settings["code"], serde_json::json!("header"));
        let child_ids: Vec<Ulid> = header.blocks.iter().map(|b| b.id).collect();
        assert_eq!(child_ids, vec![blocks[1].block_id, blocks[3].block_id]);
        assert!(content.blocks[1].blocks.is_empty());
    }

    #[test]
    fn content_json_uses_type_key() {
        let (page, tree, _) = page_with_tree();
        let snapshot = Snapshot::capture(&page, &tree).unwrap();
        let json: serde_json::Value = serde_json::from_str(&snapshot.content).unwrap();

        assert_eq!(json["blocks"][0]["type"], serde_json::json!("container"));
        assert_eq!(json["route_name"], serde_json::json!("homepage"));
    }

    #[test]
    fn block_tree_materializes_captured_hierarchy() {
        let (page, tree, _) = page_with_tree();
        let snapshot = Snapshot::capture(&page, &tree).unwrap();

        let restored = snapshot.block_tree().unwrap();
        assert_eq!(restored.len(), tree.len());
        let original: Vec<Ulid> = tree.depth_first().iter().map(|n| n.block().block_id).collect();
        let round: Vec<Ulid> = restored
            .depth_first()
            .iter()
            .map(|n| n.block().block_id)
            .collect();
        assert_eq!(original, round);
    }

    #[test]
    fn corrupted_content_reports_orphan() {
        let (page, tree, _) = page_with_tree();
        let mut content = SnapshotContent::capture(&page, &tree);
        content.blocks[0].blocks[0].parent_id = Some(Ulid::new());
        let mut snapshot = Snapshot::capture(&page, &tree).unwrap();
        snapshot.content = serde_json::to_string(&content).unwrap();

        let err = snapshot.block_tree().unwrap_err();
        assert!(matches!(
            err,
            SnapshotContentError::Tree(TreeError::Orphan { .. })
        ));
    }

    #[test]
    fn active_window_is_inclusive_at_end() {
        let (page, tree, _) = page_with_tree();
        let mut snapshot = Snapshot::capture(&page, &tree).unwrap();
        let start = Utc::now();
        snapshot.publication_date_start = Some(start);

        assert!(snapshot.is_active_at(start));
        assert!(!snapshot.is_active_at(start - Duration::seconds(1)));

        snapshot.publication_date_end = Some(start + Duration::seconds(10));
        assert!(snapshot.is_active_at(start + Duration::seconds(10)));
        assert!(!snapshot.is_active_at(start + Duration::seconds(11)));

        snapshot.enabled = false;
        assert!(!snapshot.is_active_at(start));
    }
}
