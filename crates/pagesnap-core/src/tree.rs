// ABOUTME: Rebuilds a page's block hierarchy from a flat, position-ordered list of blocks.
// ABOUTME: Nodes live in an arena indexed by position in the input; children are attached by index.

use std::collections::HashMap;

use thiserror::Error;
use ulid::Ulid;

use crate::block::Block;

/// Errors raised while reconstructing a block tree. All of them are
/// data-integrity faults: no partial tree is ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("block {block_id} references parent {parent_id} which is not part of the batch")]
    Orphan { block_id: Ulid, parent_id: Ulid },

    #[error("block {0} appears more than once in the batch")]
    DuplicateBlock(Ulid),

    #[error("block {0} is unreachable from any root (parent cycle)")]
    Cycle(Ulid),
}

/// What to do with a block whose parent is absent from the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrphanPolicy {
    /// Fail the whole batch with `TreeError::Orphan`.
    #[default]
    Reject,
    /// Keep the block as an additional root, in encounter order.
    PromoteToRoot,
}

/// An immutable block hierarchy. Blocks are stored in the order they were
/// supplied; `children[i]` and `roots` hold arena indices in sibling order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTree {
    blocks: Vec<Block>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    index: HashMap<Ulid, usize>,
}

impl BlockTree {
    /// Build a tree from blocks sorted by position ascending, rejecting
    /// dangling parent references.
    pub fn build(blocks: Vec<Block>) -> Result<Self, TreeError> {
        Self::build_with(blocks, OrphanPolicy::Reject)
    }

    /// Build a tree with an explicit orphan policy.
    ///
    /// The input must already be ordered by position. Sibling order is the
    /// order of appearance, so no sort happens here. A child may appear
    /// before its parent in the input; the id index is complete before any
    /// attachment is made.
    pub fn build_with(blocks: Vec<Block>, policy: OrphanPolicy) -> Result<Self, TreeError> {
        let mut index = HashMap::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if index.insert(block.block_id, i).is_some() {
                return Err(TreeError::DuplicateBlock(block.block_id));
            }
        }

        let mut children = vec![Vec::new(); blocks.len()];
        let mut roots = Vec::new();

        for (i, block) in blocks.iter().enumerate() {
            let Some(parent_id) = block.parent_id else {
                roots.push(i);
                continue;
            };

            match (index.get(&parent_id), policy) {
                (Some(&parent), _) => children[parent].push(i),
                (None, OrphanPolicy::PromoteToRoot) => {
                    tracing::warn!(
                        "promoting orphan block {} to root (missing parent {})",
                        block.block_id,
                        parent_id
                    );
                    roots.push(i);
                }
                (None, OrphanPolicy::Reject) => {
                    return Err(TreeError::Orphan {
                        block_id: block.block_id,
                        parent_id,
                    });
                }
            }
        }

        let tree = Self {
            blocks,
            children,
            roots,
            index,
        };
        tree.check_reachable()?;
        for (first, second) in tree.position_collisions() {
            tracing::warn!(
                "sibling blocks {} and {} share a position; keeping input order",
                first,
                second
            );
        }
        Ok(tree)
    }

    /// Pairs of adjacent siblings that share a position. Such siblings are
    /// kept in input order, which for stored blocks means by block id.
    pub fn position_collisions(&self) -> Vec<(Ulid, Ulid)> {
        std::iter::once(&self.roots)
            .chain(self.children.iter())
            .flat_map(|siblings| siblings.windows(2))
            .filter(|pair| self.blocks[pair[0]].position == self.blocks[pair[1]].position)
            .map(|pair| (self.blocks[pair[0]].block_id, self.blocks[pair[1]].block_id))
            .collect()
    }

    /// Every block must hang off a root. Blocks that only point at each
    /// other never get reached and would silently vanish from the tree.
    fn check_reachable(&self) -> Result<(), TreeError> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack: Vec<usize> = self.roots.clone();
        while let Some(i) = stack.pop() {
            seen[i] = true;
            stack.extend(&self.children[i]);
        }

        match seen.iter().position(|reached| !reached) {
            Some(i) => Err(TreeError::Cycle(self.blocks[i].block_id)),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Root blocks in sibling order.
    pub fn roots(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.roots.iter().map(|&index| NodeRef { tree: self, index })
    }

    /// Find a node by block id.
    pub fn get(&self, block_id: &Ulid) -> Option<NodeRef<'_>> {
        self.index
            .get(block_id)
            .map(|&index| NodeRef { tree: self, index })
    }

    /// All nodes in depth-first pre-order, siblings in position order.
    pub fn depth_first(&self) -> Vec<NodeRef<'_>> {
        let mut out = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            out.push(NodeRef { tree: self, index });
            stack.extend(self.children[index].iter().rev());
        }
        out
    }
}

/// A borrowed view of one node in a `BlockTree`.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a BlockTree,
    index: usize,
}

impl<'a> NodeRef<'a> {
    pub fn block(&self) -> &'a Block {
        &self.tree.blocks[self.index]
    }

    /// Direct children in sibling order.
    pub fn children(&self) -> impl Iterator<Item = NodeRef<'a>> + use<'a> {
        let tree = self.tree;
        tree.children[self.index]
            .iter()
            .map(move |&index| NodeRef { tree, index })
    }

    pub fn child_count(&self) -> usize {
        self.tree.children[self.index].len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids<'a>(nodes: impl Iterator<Item = NodeRef<'a>>) -> Vec<Ulid> {
        nodes.map(|n| n.block().block_id).collect()
    }

    fn block(page_id: Ulid, position: i64) -> Block {
        Block::new(page_id, "text".to_string(), position)
    }

    #[test]
    fn builds_roots_and_children_in_input_order() {
        let page_id = Ulid::new();
        let b1 = block(page_id, 0);
        let b2 = block(page_id, 0).child_of(&b1);
        let b3 = block(page_id, 1);

        let tree = BlockTree::build(vec![b1.clone(), b2.clone(), b3.clone()]).unwrap();

        assert_eq!(ids(tree.roots()), vec![b1.block_id, b3.block_id]);
        let first = tree.roots().next().unwrap();
        assert_eq!(ids(first.children()), vec![b2.block_id]);
        assert_eq!(tree.get(&b3.block_id).unwrap().child_count(), 0);
    }

    #[test]
    fn get_resolves_nested_blocks_by_id() {
        let page_id = Ulid::new();
        let root = block(page_id, 0);
        let mid = block(page_id, 0).child_of(&root);
        let leaf = block(page_id, 0).child_of(&mid);

        let tree = BlockTree::build(vec![root, mid.clone(), leaf.clone()]).unwrap();

        let node = tree.get(&mid.block_id).unwrap();
        assert_eq!(node.block().block_id, mid.block_id);
        assert_eq!(ids(node.children()), vec![leaf.block_id]);
        assert!(tree.get(&Ulid::new()).is_none());
    }

    #[test]
    fn shared_sibling_positions_are_reported_in_input_order() {
        let page_id = Ulid::new();
        let a = block(page_id, 0);
        let b = block(page_id, 0);
        let parent = block(page_id, 1);
        let c = block(page_id, 2).child_of(&parent);
        let d = block(page_id, 3).child_of(&parent);

        let tree =
            BlockTree::build(vec![a.clone(), b.clone(), parent.clone(), c, d]).unwrap();

        assert_eq!(tree.position_collisions(), vec![(a.block_id, b.block_id)]);
        assert_eq!(
            ids(tree.roots()),
            vec![a.block_id, b.block_id, parent.block_id]
        );
    }

    #[test]
    fn child_listed_before_parent_is_attached() {
        let page_id = Ulid::new();
        let parent = block(page_id, 1);
        let child = block(page_id, 0).child_of(&parent);

        let tree = BlockTree::build(vec![child.clone(), parent.clone()]).unwrap();

        assert_eq!(ids(tree.roots()), vec![parent.block_id]);
        assert_eq!(
            ids(tree.get(&parent.block_id).unwrap().children()),
            vec![child.block_id]
        );
    }

    #[test]
    fn orphan_is_rejected_by_default() {
        let page_id = Ulid::new();
        let missing = block(page_id, 0);
        let orphan = block(page_id, 1).child_of(&missing);

        let err = BlockTree::build(vec![block(page_id, 0), orphan.clone()]).unwrap_err();

        assert_eq!(
            err,
            TreeError::Orphan {
                block_id: orphan.block_id,
                parent_id: missing.block_id,
            }
        );
    }

    #[test]
    fn orphan_promoted_when_policy_allows() {
        let page_id = Ulid::new();
        let root = block(page_id, 0);
        let missing = block(page_id, 0);
        let orphan = block(page_id, 1).child_of(&missing);

        let tree = BlockTree::build_with(
            vec![root.clone(), orphan.clone()],
            OrphanPolicy::PromoteToRoot,
        )
        .unwrap();

        assert_eq!(ids(tree.roots()), vec![root.block_id, orphan.block_id]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let page_id = Ulid::new();
        let b = block(page_id, 0);

        let err = BlockTree::build(vec![b.clone(), b.clone()]).unwrap_err();
        assert_eq!(err, TreeError::DuplicateBlock(b.block_id));
    }

    #[test]
    fn parent_cycle_is_rejected() {
        let page_id = Ulid::new();
        let mut a = block(page_id, 0);
        let b = block(page_id, 1).child_of(&a);
        a.parent_id = Some(b.block_id);

        let err = BlockTree::build(vec![a, b]).unwrap_err();
        assert!(matches!(err, TreeError::Cycle(_)));
    }

    #[test]
    fn depth_first_reproduces_members_and_sibling_order() {
        let page_id = Ulid::new();
        let r1 = block(page_id, 0);
        let c1 = block(page_id, 0).child_of(&r1);
        let g1 = block(page_id, 0).child_of(&c1);
        let c2 = block(page_id, 1).child_of(&r1);
        let r2 = block(page_id, 1);
        let c3 = block(page_id, 2).child_of(&r1);
        // position-ordered input, as a store would return it
        let input = vec![
            r1.clone(),
            c1.clone(),
            g1.clone(),
            c2.clone(),
            r2.clone(),
            c3.clone(),
        ];

        let tree = BlockTree::build(input.clone()).unwrap();
        let flat: Vec<&Block> = tree.depth_first().iter().map(|n| n.block()).collect();

        assert_eq!(flat.len(), input.len());
        for original in &input {
            assert!(flat.iter().any(|b| b.block_id == original.block_id));
        }

        let ordered = ids(tree.depth_first().into_iter());
        assert_eq!(
            ordered,
            vec![
                r1.block_id,
                c1.block_id,
                g1.block_id,
                c2.block_id,
                c3.block_id,
                r2.block_id
            ]
        );

        for node in tree.depth_first() {
            let expected: Vec<Ulid> = input
                .iter()
                .filter(|b| b.parent_id == Some(node.block().block_id))
                .map(|b| b.block_id)
                .collect();
            assert_eq!(ids(node.children()), expected);
        }
    }

    #[test]
    fn build_is_idempotent() {
        let page_id = Ulid::new();
        let r = block(page_id, 0);
        let c = block(page_id, 0).child_of(&r);
        let input = vec![r, c];

        let first = BlockTree::build(input.clone()).unwrap();
        let second = BlockTree::build(input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_builds_empty_tree() {
        let tree = BlockTree::build(Vec::new()).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.roots().count(), 0);
    }
}
