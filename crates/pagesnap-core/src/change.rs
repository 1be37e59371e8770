// ABOUTME: Content-change notifications and the snapshot requests they resolve to.
// ABOUTME: Whether a change came from a block or a page is settled once, at this boundary.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Something an editor changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ContentChange {
    Page { page_id: Ulid },
    /// Blocks detached from any page carry no publishable change.
    Block { block_id: Ulid, page_id: Option<Ulid> },
}

/// A request to (re)publish snapshots, consumed asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id")]
pub enum SnapshotRequest {
    Page(Ulid),
    Site(Ulid),
}

impl ContentChange {
    /// The page snapshot this change calls for, if any.
    pub fn snapshot_request(&self) -> Option<SnapshotRequest> {
        match self {
            ContentChange::Page { page_id } => Some(SnapshotRequest::Page(*page_id)),
            ContentChange::Block { page_id, .. } => page_id.map(SnapshotRequest::Page),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_change_targets_owning_page() {
        let page_id = Ulid::new();
        let change = ContentChange::Block {
            block_id: Ulid::new(),
            page_id: Some(page_id),
        };
        assert_eq!(change.snapshot_request(), Some(SnapshotRequest::Page(page_id)));
    }

    #[test]
    fn detached_block_change_requests_nothing() {
        let change = ContentChange::Block {
            block_id: Ulid::new(),
            page_id: None,
        };
        assert_eq!(change.snapshot_request(), None);
    }

    #[test]
    fn request_serializes_with_scope_tag() {
        let site_id = Ulid::new();
        let json = serde_json::to_value(SnapshotRequest::Site(site_id)).unwrap();
        assert_eq!(json["scope"], serde_json::json!("Site"));
        assert_eq!(json["id"], serde_json::json!(site_id.to_string()));
    }
}
