use std::fmt;

/// Zero-based column index of a split variable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    /// Wrap a column position of the [`Data`](crate::Data) table.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a tree's node arena.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Wrap a position in the tree's node arena.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in the node arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A node in a tree arena.
///
/// Children are referenced by [`NodeIndex`]; the root is created first and
/// children are always appended after their parent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// An interior split node.
    Split {
        /// Column used for the split.
        var: FeatureIndex,
        /// Samples with a value `<= value` go left.
        value: f64,
        /// Whether samples with a missing value go left.
        send_missing_left: bool,
        /// Index of the left child node.
        left: NodeIndex,
        /// Index of the right child node.
        right: NodeIndex,
    },
    /// A terminal node holding the samples that estimate its statistics.
    Leaf {
        /// Row indices of the leaf's samples.
        samples: Vec<usize>,
    },
}

impl Node {
    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    /// Return the leaf samples, or an empty slice for split nodes.
    #[must_use]
    pub fn samples(&self) -> &[usize] {
        match self {
            Node::Leaf { samples } => samples,
            Node::Split { .. } => &[],
        }
    }

    /// Whether a sample with value `x` for this node's variable goes left.
    ///
    /// Always `false` for leaves.
    #[must_use]
    pub fn goes_left(&self, x: f64) -> bool {
        match *self {
            Node::Split {
                value,
                send_missing_left,
                ..
            } => x <= value || (send_missing_left && x.is_nan()) || (value.is_nan() && x.is_nan()),
            Node::Leaf { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureIndex, Node, NodeIndex};

    #[test]
    fn indices_display_as_positions() {
        assert_eq!(FeatureIndex::new(7).index(), 7);
        assert_eq!(FeatureIndex::new(7).to_string(), "7");
        assert!(NodeIndex::new(3) < NodeIndex::new(4));
        assert_eq!(NodeIndex::new(0).to_string(), "0");
    }

    fn split(value: f64, send_missing_left: bool) -> Node {
        Node::Split {
            var: FeatureIndex::new(0),
            value,
            send_missing_left,
            left: NodeIndex::new(1),
            right: NodeIndex::new(2),
        }
    }

    #[test]
    fn threshold_routing() {
        let node = split(2.0, false);
        assert!(node.goes_left(2.0));
        assert!(node.goes_left(-1.0));
        assert!(!node.goes_left(2.5));
    }

    #[test]
    fn missing_values_follow_flag() {
        assert!(split(2.0, true).goes_left(f64::NAN));
        assert!(!split(2.0, false).goes_left(f64::NAN));
    }

    #[test]
    fn nan_threshold_sends_only_missing_left() {
        let node = split(f64::NAN, false);
        assert!(node.goes_left(f64::NAN));
        assert!(!node.goes_left(0.0));
    }

    #[test]
    fn leaf_reports_samples() {
        let leaf = Node::Leaf { samples: vec![4, 2] };
        assert!(leaf.is_leaf());
        assert_eq!(leaf.samples(), &[4, 2]);
        assert!(split(1.0, false).samples().is_empty());
    }
}
