//! Split-frequency based variable importance.

use crate::forest::Forest;
use crate::node::Node;

/// A ranked variable with name, importance score, and rank.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RankedVariable {
    /// Column name.
    pub name: String,
    /// Column index in the training data.
    pub index: usize,
    /// Importance score (sums to 1.0 across columns when any split exists).
    pub importance: f64,
    /// 1-based rank (1 = most important).
    pub rank: usize,
}

/// Count splits per variable at each depth.
///
/// Returns `counts[depth][variable]` for depths `0..max_depth`, where the
/// root is depth 0. Splits below `max_depth` are ignored.
#[must_use]
pub fn split_frequencies(forest: &Forest, max_depth: usize) -> Vec<Vec<usize>> {
    let mut counts = vec![vec![0usize; forest.num_variables()]; max_depth];
    for tree in forest.trees() {
        for (node, depth) in tree.reachable() {
            if depth >= max_depth {
                continue;
            }
            if let Node::Split { var, .. } = &tree.nodes()[node.index()] {
                if let Some(count) = counts[depth].get_mut(var.index()) {
                    *count += 1;
                }
            }
        }
    }
    counts
}

/// Depth-weighted share of splits on each variable.
///
/// Each depth's counts are normalized to shares of that depth's splits,
/// then combined with weight `k^-decay_exponent` for the `k`-th level
/// (root is level 1) and divided by the total weight.
#[must_use]
pub fn variable_importance(forest: &Forest, decay_exponent: f64, max_depth: usize) -> Vec<f64> {
    let frequencies = split_frequencies(forest, max_depth);
    let mut importance = vec![0.0; forest.num_variables()];
    let mut total_weight = 0.0;
    for (depth, counts) in frequencies.iter().enumerate() {
        let weight = ((depth + 1) as f64).powf(-decay_exponent);
        total_weight += weight;
        let splits = counts.iter().sum::<usize>().max(1) as f64;
        for (value, &count) in importance.iter_mut().zip(counts) {
            *value += weight * count as f64 / splits;
        }
    }
    if total_weight > 0.0 {
        importance.iter_mut().for_each(|v| *v /= total_weight);
    }
    importance
}

/// Sort variables by importance, descending, and assign 1-based ranks.
///
/// Columns without a name are called `x{index}`.
#[must_use]
pub fn rank_variables(importance: &[f64], names: &[String]) -> Vec<RankedVariable> {
    let mut ranked: Vec<RankedVariable> = importance
        .iter()
        .enumerate()
        .map(|(index, &importance)| RankedVariable {
            name: names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("x{index}")),
            index,
            importance,
            rank: 0,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    for (i, variable) in ranked.iter_mut().enumerate() {
        variable.rank = i + 1;
    }
    ranked
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::node::{FeatureIndex, NodeIndex};
    use crate::tree::Tree;

    fn split(var: usize, left: usize, right: usize) -> Node {
        Node::Split {
            var: FeatureIndex::new(var),
            value: 0.5,
            send_missing_left: true,
            left: NodeIndex::new(left),
            right: NodeIndex::new(right),
        }
    }

    fn leaf() -> Node {
        Node::Leaf { samples: vec![0] }
    }

    /// Root splits on 0, its left child on 1.
    fn forest() -> Forest {
        let nodes = vec![split(0, 1, 2), split(1, 3, 4), leaf(), leaf(), leaf()];
        let tree = Tree::new(nodes, vec![0]);
        let stump = Tree::new(vec![leaf()], vec![0]);
        Forest::new(vec![tree.clone(), tree, stump], 3, 1)
    }

    #[test]
    fn frequencies_by_depth() {
        let counts = split_frequencies(&forest(), 3);
        assert_eq!(counts, vec![vec![2, 0, 0], vec![0, 2, 0], vec![0, 0, 0]]);
        assert_eq!(split_frequencies(&forest(), 1), vec![vec![2, 0, 0]]);
    }

    #[test]
    fn importance_weights_shallow_splits_more() {
        let importance = variable_importance(&forest(), 2.0, 2);
        // weights 1 and 1/4, each level's shares are one-hot
        assert_abs_diff_eq!(importance[0], 1.0 / 1.25, epsilon = 1e-12);
        assert_abs_diff_eq!(importance[1], 0.25 / 1.25, epsilon = 1e-12);
        assert_abs_diff_eq!(importance[2], 0.0);
        assert_abs_diff_eq!(importance.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn ranking_is_descending_with_fallback_names() {
        let names = vec!["age".to_string(), "income".to_string()];
        let ranked = rank_variables(&[0.2, 0.5, 0.3], &names);
        let order: Vec<&str> = ranked.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(order, vec!["income", "x2", "age"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].index, 0);
    }
}
