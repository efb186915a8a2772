//! src/bsp/bsp_node.rs

use crate::bsp::bsp_segment::{SectorIndex, SegmentIndex};
use crate::bsp::bsp_util::{BoundingBox, Point2D, Vector2D};

pub type NodeIndex = usize;
pub type LeafIndex = usize;
pub type TreeIndex = usize;

/// Snapshot of the half-plane an internal node partitioned along.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionLine {
    pub origin: Point2D,
    pub direction: Vector2D,
}

/// A built internal node: the partition line plus the bounds of the map
/// geometry on each child side.
#[derive(Debug, Clone)]
pub struct BspNodeData {
    pub partition: PartitionLine,
    pub right_bounds: BoundingBox,
    pub left_bounds: BoundingBox,
    pub right: Option<BspElement>,
    pub left: Option<BspElement>,
}

/// A built leaf: the head of its half-edge ring, the ring size, and the
/// sector chosen for it after winding.
#[derive(Debug, Clone, Default)]
pub struct BspLeafData {
    pub first_hedge: Option<SegmentIndex>,
    pub hedge_count: usize,
    pub sector: Option<SectorIndex>,
}

/// A built BSP element: either an internal node or a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BspElement {
    Node(NodeIndex),
    Leaf(LeafIndex),
}

/// A node of the internal binary tree the built elements hang off.
/// `element` is `None` once the caller has claimed ownership of the
/// built artifact.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub element: Option<BspElement>,
    pub right: Option<TreeIndex>,
    pub left: Option<TreeIndex>,
    pub parent: Option<TreeIndex>,
}

/// Owns every built node and leaf, the internal tree around them, and the
/// map from built elements back to their tree nodes.
#[derive(Default)]
pub struct BspTree {
    nodes: Vec<BspNodeData>,
    leafs: Vec<BspLeafData>,
    tree: Vec<TreeNode>,
    node_tree: Vec<Option<TreeIndex>>,
    leaf_tree: Vec<Option<TreeIndex>>,
    root: Option<TreeIndex>,
}

impl BspTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_node(&mut self, data: BspNodeData) -> NodeIndex {
        self.nodes.push(data);
        self.node_tree.push(None);
        self.nodes.len() - 1
    }

    pub fn new_leaf(&mut self, data: BspLeafData) -> LeafIndex {
        self.leafs.push(data);
        self.leaf_tree.push(None);
        self.leafs.len() - 1
    }

    /// Wrap a built element in a tree node, linking up its subtrees and
    /// registering the element -> tree-node mapping.
    pub fn new_tree_node(
        &mut self,
        element: BspElement,
        right: Option<TreeIndex>,
        left: Option<TreeIndex>,
    ) -> TreeIndex {
        let index = self.tree.len();
        self.tree.push(TreeNode {
            element: Some(element),
            right,
            left,
            parent: None,
        });
        if let Some(right) = right {
            self.tree[right].parent = Some(index);
        }
        if let Some(left) = left {
            self.tree[left].parent = Some(index);
        }
        match element {
            BspElement::Node(node) => self.node_tree[node] = Some(index),
            BspElement::Leaf(leaf) => self.leaf_tree[leaf] = Some(index),
        }
        index
    }

    pub fn set_root(&mut self, root: Option<TreeIndex>) {
        self.root = root;
    }

    pub fn root(&self) -> Option<TreeIndex> {
        self.root
    }

    pub fn tree_node(&self, index: TreeIndex) -> &TreeNode {
        &self.tree[index]
    }

    pub fn is_leaf(&self, index: TreeIndex) -> bool {
        matches!(self.tree[index].element, Some(BspElement::Leaf(_)))
    }

    pub fn node(&self, index: NodeIndex) -> &BspNodeData {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut BspNodeData {
        &mut self.nodes[index]
    }

    pub fn leaf(&self, index: LeafIndex) -> &BspLeafData {
        &self.leafs[index]
    }

    pub fn leaf_mut(&mut self, index: LeafIndex) -> &mut BspLeafData {
        &mut self.leafs[index]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leafs.len()
    }

    /// Tree node owning a built element, if the element is still ours.
    pub fn tree_node_for_element(&self, element: BspElement) -> Option<TreeIndex> {
        match element {
            BspElement::Node(node) => self.node_tree.get(node).copied().flatten(),
            BspElement::Leaf(leaf) => self.leaf_tree.get(leaf).copied().flatten(),
        }
    }

    /// Transfer ownership of a built element to the caller: the element is
    /// detached from its tree node and dropped from the back map. Returns
    /// `false` if the element was unknown or already released.
    pub fn release_element(&mut self, element: BspElement) -> bool {
        let Some(tree_index) = self.tree_node_for_element(element) else {
            return false;
        };
        self.tree[tree_index].element = None;
        match element {
            BspElement::Node(node) => self.node_tree[node] = None,
            BspElement::Leaf(leaf) => self.leaf_tree[leaf] = None,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_data() -> BspLeafData {
        BspLeafData::default()
    }

    #[test]
    fn test_tree_linkage() {
        let mut tree = BspTree::new();
        let l1 = tree.new_leaf(leaf_data());
        let l2 = tree.new_leaf(leaf_data());
        let t1 = tree.new_tree_node(BspElement::Leaf(l1), None, None);
        let t2 = tree.new_tree_node(BspElement::Leaf(l2), None, None);
        let node = tree.new_node(BspNodeData {
            partition: PartitionLine {
                origin: Point2D::new(0.0, 32.0),
                direction: Vector2D::new(64.0, 0.0),
            },
            right_bounds: BoundingBox::new_empty(),
            left_bounds: BoundingBox::new_empty(),
            right: Some(BspElement::Leaf(l1)),
            left: Some(BspElement::Leaf(l2)),
        });
        let top = tree.new_tree_node(BspElement::Node(node), Some(t1), Some(t2));
        tree.set_root(Some(top));

        assert!(tree.is_leaf(t1));
        assert!(!tree.is_leaf(top));
        assert_eq!(tree.tree_node(t1).parent, Some(top));
        assert_eq!(tree.tree_node_for_element(BspElement::Node(node)), Some(top));
    }

    #[test]
    fn test_release_detaches_element() {
        let mut tree = BspTree::new();
        let leaf = tree.new_leaf(leaf_data());
        let t = tree.new_tree_node(BspElement::Leaf(leaf), None, None);
        tree.set_root(Some(t));

        assert!(tree.release_element(BspElement::Leaf(leaf)));
        assert!(!tree.release_element(BspElement::Leaf(leaf)));
        assert_eq!(tree.tree_node(t).element, None);
        assert_eq!(tree.tree_node_for_element(BspElement::Leaf(leaf)), None);
    }
}
