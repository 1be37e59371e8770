// ABOUTME: Core library for pagesnap, containing the page, block, and snapshot domain types.
// ABOUTME: Also hosts block tree reconstruction and lookup criteria; performs no I/O.

pub mod block;
pub mod change;
pub mod criteria;
pub mod model;
pub mod snapshot;
pub mod tree;

pub use block::Block;
pub use change::{ContentChange, SnapshotRequest};
pub use criteria::{Criteria, CriteriaError};
pub use model::{Page, Site};
pub use snapshot::{BlockContent, Snapshot, SnapshotContent, SnapshotContentError};
pub use tree::{BlockTree, NodeRef, OrphanPolicy, TreeError};
