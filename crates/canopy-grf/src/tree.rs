//! A trained tree: node arena, drawn samples and precomputed leaf statistics.

use std::collections::VecDeque;

use crate::data::Data;
use crate::node::{Node, NodeIndex};
use crate::prediction::PredictionValues;

/// One tree of a forest.
///
/// Built once by [`TreeTrainer`](crate::TreeTrainer). The only later change
/// is the honest repopulation of leaves (and optional pruning) before the
/// leaf statistics are computed.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub(crate) root: NodeIndex,
    pub(crate) nodes: Vec<Node>,
    pub(crate) drawn_samples: Vec<usize>,
    pub(crate) prediction_values: PredictionValues,
}

impl Tree {
    pub(crate) fn new(nodes: Vec<Node>, drawn_samples: Vec<usize>) -> Self {
        Self {
            root: NodeIndex::new(0),
            nodes,
            drawn_samples,
            prediction_values: PredictionValues::default(),
        }
    }

    /// Return the root node index.
    #[must_use]
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Return the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the rows drawn into this tree (both honesty halves).
    #[must_use]
    pub fn drawn_samples(&self) -> &[usize] {
        &self.drawn_samples
    }

    /// Return the precomputed leaf statistics.
    #[must_use]
    pub fn prediction_values(&self) -> &PredictionValues {
        &self.prediction_values
    }

    /// Return the samples of every node, indexed by arena position.
    #[must_use]
    pub fn leaf_samples(&self) -> Vec<&[usize]> {
        self.nodes.iter().map(Node::samples).collect()
    }

    /// Whether `node` is a leaf.
    #[must_use]
    pub fn is_leaf(&self, node: NodeIndex) -> bool {
        self.nodes[node.index()].is_leaf()
    }

    /// Whether `node` is a leaf without samples.
    #[must_use]
    pub fn is_empty_leaf(&self, node: NodeIndex) -> bool {
        matches!(&self.nodes[node.index()], Node::Leaf { samples } if samples.is_empty())
    }

    /// Route one row of `data` to its leaf.
    #[must_use]
    pub fn find_leaf_node(&self, data: &Data, sample: usize) -> NodeIndex {
        let mut node = self.root;
        loop {
            let current = &self.nodes[node.index()];
            match current {
                Node::Leaf { .. } => return node,
                Node::Split { var, left, right, .. } => {
                    node = if current.goes_left(data.get(sample, var.index())) {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Route every row whose `valid` flag is set; other rows get `None`.
    #[must_use]
    pub fn find_leaf_nodes(&self, data: &Data, valid: &[bool]) -> Vec<Option<NodeIndex>> {
        (0..data.num_rows())
            .map(|sample| {
                valid
                    .get(sample)
                    .copied()
                    .unwrap_or(true)
                    .then(|| self.find_leaf_node(data, sample))
            })
            .collect()
    }

    /// Replace every leaf's samples with the leaves `samples` fall into.
    pub(crate) fn repopulate_leaf_nodes(&mut self, data: &Data, samples: &[usize]) {
        let mut by_node: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        for &sample in samples {
            let leaf = self.find_leaf_node(data, sample);
            by_node[leaf.index()].push(sample);
        }
        for (node, new_samples) in self.nodes.iter_mut().zip(by_node) {
            if let Node::Leaf { samples } = node {
                *samples = new_samples;
            }
        }
    }

    /// Collapse splits that lead to empty leaves.
    ///
    /// Nodes are visited bottom-up. A split with an empty child becomes a
    /// leaf; if its other child is non-empty, that child takes its place in
    /// the parent. Splits whose children are both empty become empty leaves
    /// themselves, so emptiness propagates upward.
    pub(crate) fn honesty_prune_leaves(&mut self) {
        for node in (0..self.nodes.len()).rev() {
            let (left, right) = match self.nodes[node] {
                Node::Split { left, right, .. } => (left, right),
                Node::Leaf { .. } => continue,
            };
            let new_left = if self.is_leaf(left) { left } else { self.prune_node(left) };
            let new_right = if self.is_leaf(right) { right } else { self.prune_node(right) };
            if let Node::Split { left, right, .. } = &mut self.nodes[node] {
                *left = new_left;
                *right = new_right;
            }
        }
        self.root = self.prune_node(self.root);
    }

    /// Prune one split node and return the index that should replace it.
    fn prune_node(&mut self, node: NodeIndex) -> NodeIndex {
        let (left, right) = match self.nodes[node.index()] {
            Node::Split { left, right, .. } => (left, right),
            Node::Leaf { .. } => return node,
        };
        let left_empty = self.is_empty_leaf(left);
        let right_empty = self.is_empty_leaf(right);
        if !left_empty && !right_empty {
            return node;
        }

        self.nodes[node.index()] = Node::Leaf { samples: Vec::new() };
        if !left_empty {
            left
        } else if !right_empty {
            right
        } else {
            node
        }
    }

    /// Return the largest column index used by any reachable split.
    #[must_use]
    pub fn max_split_variable(&self) -> Option<usize> {
        self.reachable()
            .into_iter()
            .filter_map(|(node, _)| match &self.nodes[node.index()] {
                Node::Split { var, .. } => Some(var.index()),
                Node::Leaf { .. } => None,
            })
            .max()
    }

    /// Return the number of nodes reachable from the root.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.reachable().len()
    }

    /// Return the number of leaves reachable from the root.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.reachable()
            .into_iter()
            .filter(|(node, _)| self.is_leaf(*node))
            .count()
    }

    /// Return the maximum depth of the tree. A single root leaf has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.reachable()
            .into_iter()
            .map(|(_, depth)| depth)
            .max()
            .unwrap_or(0)
    }

    /// Breadth-first list of `(node, depth)` pairs reachable from the root.
    pub(crate) fn reachable(&self) -> Vec<(NodeIndex, usize)> {
        let mut visited = Vec::new();
        if self.nodes.is_empty() {
            return visited;
        }
        let mut queue = VecDeque::new();
        queue.push_back((self.root, 0usize));
        while let Some((node, depth)) = queue.pop_front() {
            visited.push((node, depth));
            if let Node::Split { left, right, .. } = &self.nodes[node.index()] {
                queue.push_back((*left, depth + 1));
                queue.push_back((*right, depth + 1));
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FeatureIndex;

    fn split(var: usize, value: f64, left: usize, right: usize) -> Node {
        Node::Split {
            var: FeatureIndex::new(var),
            value,
            send_missing_left: true,
            left: NodeIndex::new(left),
            right: NodeIndex::new(right),
        }
    }

    fn leaf(samples: &[usize]) -> Node {
        Node::Leaf {
            samples: samples.to_vec(),
        }
    }

    // x0 <= 0.5 -> node 1, else node 2; node 2 splits x1 <= 0.5
    fn two_level_tree() -> Tree {
        Tree::new(
            vec![
                split(0, 0.5, 1, 2),
                leaf(&[0]),
                split(1, 0.5, 3, 4),
                leaf(&[1]),
                leaf(&[2]),
            ],
            vec![0, 1, 2],
        )
    }

    fn grid() -> Data {
        Data::from_rows(&[
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![f64::NAN, 1.0],
        ])
        .unwrap()
    }

    #[test]
    fn routes_samples_to_leaves() {
        let tree = two_level_tree();
        let data = grid();
        assert_eq!(tree.find_leaf_node(&data, 0), NodeIndex::new(1));
        assert_eq!(tree.find_leaf_node(&data, 1), NodeIndex::new(3));
        assert_eq!(tree.find_leaf_node(&data, 2), NodeIndex::new(4));
        // missing goes left at the root
        assert_eq!(tree.find_leaf_node(&data, 3), NodeIndex::new(1));
    }

    #[test]
    fn invalid_samples_are_not_routed() {
        let tree = two_level_tree();
        let leaves = tree.find_leaf_nodes(&grid(), &[true, false, true, false]);
        assert_eq!(leaves[0], Some(NodeIndex::new(1)));
        assert_eq!(leaves[1], None);
        assert_eq!(leaves[3], None);
    }

    #[test]
    fn shape_statistics() {
        let tree = two_level_tree();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.n_nodes(), 5);
        assert_eq!(tree.n_leaves(), 3);
        assert_eq!(tree.max_split_variable(), Some(1));
    }

    #[test]
    fn repopulation_replaces_leaf_samples() {
        let mut tree = two_level_tree();
        tree.repopulate_leaf_nodes(&grid(), &[2, 3]);
        assert_eq!(tree.nodes()[1].samples(), &[3]);
        assert!(tree.is_empty_leaf(NodeIndex::new(3)));
        assert_eq!(tree.nodes()[4].samples(), &[2]);
    }

    #[test]
    fn pruning_promotes_the_non_empty_sibling() {
        let mut tree = two_level_tree();
        tree.repopulate_leaf_nodes(&grid(), &[0, 2]);
        tree.honesty_prune_leaves();
        // node 2 had an empty child, so leaf 4 now hangs off the root
        assert_eq!(tree.find_leaf_node(&grid(), 2), NodeIndex::new(4));
        assert_eq!(tree.find_leaf_node(&grid(), 1), NodeIndex::new(4));
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn pruning_collapses_fully_empty_subtrees() {
        let mut tree = two_level_tree();
        tree.repopulate_leaf_nodes(&grid(), &[0]);
        tree.honesty_prune_leaves();
        // the right subtree is empty, the root promotes its left leaf
        assert_eq!(tree.root(), NodeIndex::new(1));
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.find_leaf_node(&grid(), 2), NodeIndex::new(1));
    }

    #[test]
    fn every_leaf_sample_appears_once() {
        let mut tree = two_level_tree();
        tree.repopulate_leaf_nodes(&grid(), &[0, 1, 2, 3]);
        let mut all: Vec<usize> = tree.leaf_samples().concat();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }
}
