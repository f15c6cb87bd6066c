//! Growing one honest tree from a sampler, a relabeling strategy and a
//! splitting rule.

use ndarray::Array2;
use tracing::debug;

use crate::data::Data;
use crate::node::{FeatureIndex, Node, NodeIndex};
use crate::prediction::OptimizedPredictionStrategy;
use crate::relabeling::RelabelingStrategy;
use crate::sampling::RandomSampler;
use crate::splitting::{Split, SplittingRule, SplittingRuleFactory};
use crate::tree::Tree;

/// Per-tree growth options.
///
/// Normally derived from [`ForestOptions`](crate::ForestOptions); built
/// directly only when training single trees.
///
/// # Defaults
///
/// | Parameter              | Default |
/// |------------------------|---------|
/// | `mtry`                 | `None` (every eligible variable) |
/// | `min_node_size`        | 5       |
/// | `honesty`              | `true`  |
/// | `honesty_fraction`     | 0.5     |
/// | `honesty_prune_leaves` | `true`  |
/// | `alpha`                | 0.05    |
/// | `imbalance_penalty`    | 0.0     |
#[derive(Debug, Clone, PartialEq)]
pub struct TreeOptions {
    mtry: Option<usize>,
    min_node_size: usize,
    honesty: bool,
    honesty_fraction: f64,
    honesty_prune_leaves: bool,
    alpha: f64,
    imbalance_penalty: f64,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            mtry: None,
            min_node_size: 5,
            honesty: true,
            honesty_fraction: 0.5,
            honesty_prune_leaves: true,
            alpha: 0.05,
            imbalance_penalty: 0.0,
        }
    }
}

impl TreeOptions {
    // --- Setters ---

    /// Set the mean number of variables tried per split.
    #[must_use]
    pub fn with_mtry(mut self, mtry: Option<usize>) -> Self {
        self.mtry = mtry;
        self
    }

    /// Set the node size at or below which a node becomes a leaf.
    #[must_use]
    pub fn with_min_node_size(mut self, min_node_size: usize) -> Self {
        self.min_node_size = min_node_size;
        self
    }

    /// Enable or disable honest splitting.
    #[must_use]
    pub fn with_honesty(mut self, honesty: bool) -> Self {
        self.honesty = honesty;
        self
    }

    /// Set the share of a tree's sample used to grow it when honest.
    #[must_use]
    pub fn with_honesty_fraction(mut self, honesty_fraction: f64) -> Self {
        self.honesty_fraction = honesty_fraction;
        self
    }

    /// Prune leaves left empty by honest repopulation.
    #[must_use]
    pub fn with_honesty_prune_leaves(mut self, honesty_prune_leaves: bool) -> Self {
        self.honesty_prune_leaves = honesty_prune_leaves;
        self
    }

    /// Set the minimum child share of a split.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the penalty on unbalanced splits.
    #[must_use]
    pub fn with_imbalance_penalty(mut self, imbalance_penalty: f64) -> Self {
        self.imbalance_penalty = imbalance_penalty;
        self
    }

    // --- Getters ---

    #[must_use]
    pub fn mtry(&self) -> Option<usize> {
        self.mtry
    }

    #[must_use]
    pub fn min_node_size(&self) -> usize {
        self.min_node_size
    }

    #[must_use]
    pub fn honesty(&self) -> bool {
        self.honesty
    }

    #[must_use]
    pub fn honesty_fraction(&self) -> f64 {
        self.honesty_fraction
    }

    #[must_use]
    pub fn honesty_prune_leaves(&self) -> bool {
        self.honesty_prune_leaves
    }

    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    #[must_use]
    pub fn imbalance_penalty(&self) -> f64 {
        self.imbalance_penalty
    }
}

/// Grows trees for one estimand.
///
/// The three strategies are fixed when the trainer is built; factories such
/// as [`regression_trainer`](crate::regression_trainer) pick them per estimand.
pub struct TreeTrainer {
    relabeling_strategy: Box<dyn RelabelingStrategy>,
    splitting_rule_factory: Box<dyn SplittingRuleFactory>,
    prediction_strategy: Option<Box<dyn OptimizedPredictionStrategy>>,
}

impl TreeTrainer {
    /// Combine the strategies of one estimand.
    ///
    /// Without a prediction strategy the tree keeps no leaf statistics and
    /// is predicted from forest weights instead.
    #[must_use]
    pub fn new(
        relabeling_strategy: Box<dyn RelabelingStrategy>,
        splitting_rule_factory: Box<dyn SplittingRuleFactory>,
        prediction_strategy: Option<Box<dyn OptimizedPredictionStrategy>>,
    ) -> Self {
        Self {
            relabeling_strategy,
            splitting_rule_factory,
            prediction_strategy,
        }
    }

    /// Grow one tree on the sampling units `clusters`.
    ///
    /// With honesty the units are split in two: one half decides the
    /// splits, the other repopulates the leaves.
    pub fn train(
        &self,
        data: &Data,
        sampler: &mut RandomSampler<'_>,
        clusters: &[usize],
        options: &TreeOptions,
    ) -> Tree {
        let (growing_clusters, honest_clusters) = if options.honesty() {
            sampler.subsample(clusters, options.honesty_fraction())
        } else {
            (clusters.to_vec(), Vec::new())
        };
        let growing_samples = sampler.sample_from_clusters(&growing_clusters);

        let nodes = self.grow(data, sampler, growing_samples, options);
        let mut tree = Tree::new(nodes, sampler.get_samples_in_clusters(clusters));

        if options.honesty() {
            let honest_samples = sampler.sample_from_clusters(&honest_clusters);
            tree.repopulate_leaf_nodes(data, &honest_samples);
            if options.honesty_prune_leaves() {
                tree.honesty_prune_leaves();
            }
        }

        if let Some(strategy) = &self.prediction_strategy {
            let values = strategy.precompute_prediction_values(&tree.leaf_samples(), data);
            tree.prediction_values = values;
        }
        debug!(
            nodes = tree.nodes().len(),
            drawn = tree.drawn_samples().len(),
            "grew tree"
        );
        tree
    }

    /// Breadth-first growth. Nodes are appended, so walking the arena in
    /// order visits every open node exactly once.
    fn grow(
        &self,
        data: &Data,
        sampler: &mut RandomSampler<'_>,
        samples: Vec<usize>,
        options: &TreeOptions,
    ) -> Vec<Node> {
        let mut splitting_rule = self
            .splitting_rule_factory
            .create(data.max_num_unique_values(), options);
        let mut responses =
            Array2::zeros((data.num_rows(), self.relabeling_strategy.response_length()));

        let mut nodes = vec![Node::Leaf { samples }];
        let mut next = 0;
        while next < nodes.len() {
            let samples = match &mut nodes[next] {
                Node::Leaf { samples } => std::mem::take(samples),
                Node::Split { .. } => {
                    next += 1;
                    continue;
                }
            };

            let split = self.find_split(
                data,
                sampler,
                &samples,
                options,
                splitting_rule.as_mut(),
                &mut responses,
            );
            let Some(split) = split else {
                nodes[next] = Node::Leaf { samples };
                next += 1;
                continue;
            };

            let node = Node::Split {
                var: FeatureIndex::new(split.var),
                value: split.value,
                send_missing_left: split.send_missing_left,
                left: NodeIndex::new(nodes.len()),
                right: NodeIndex::new(nodes.len() + 1),
            };
            let (left, right): (Vec<usize>, Vec<usize>) = samples
                .iter()
                .copied()
                .partition(|&sample| node.goes_left(data.get(sample, split.var)));
            if left.is_empty() || right.is_empty() {
                nodes[next] = Node::Leaf { samples };
            } else {
                nodes[next] = node;
                nodes.push(Node::Leaf { samples: left });
                nodes.push(Node::Leaf { samples: right });
            }
            next += 1;
        }
        nodes
    }

    /// Decide whether a node splits. `None` makes it a leaf.
    fn find_split(
        &self,
        data: &Data,
        sampler: &mut RandomSampler<'_>,
        samples: &[usize],
        options: &TreeOptions,
        splitting_rule: &mut dyn SplittingRule,
        responses: &mut Array2<f64>,
    ) -> Option<Split> {
        if samples.len() <= options.min_node_size() {
            return None;
        }
        let possible_split_vars = draw_split_variables(data, sampler, options);
        if possible_split_vars.is_empty() {
            return None;
        }
        if self.relabeling_strategy.relabel(samples, data, responses) {
            return None;
        }
        splitting_rule.find_best_split(data, samples, &possible_split_vars, responses)
    }
}

/// Draw `max(1, min(Poisson(mtry), eligible))` split candidates, skipping
/// columns reserved for data roles.
fn draw_split_variables(
    data: &Data,
    sampler: &mut RandomSampler<'_>,
    options: &TreeOptions,
) -> Vec<usize> {
    let disallowed = data.disallowed_split_variables();
    let eligible = data.num_cols() - disallowed.len();
    let num_vars = match options.mtry() {
        Some(mtry) => sampler.sample_poisson(mtry).min(eligible).max(1),
        None => eligible,
    };
    sampler.draw(data.num_cols(), disallowed, num_vars)
}
