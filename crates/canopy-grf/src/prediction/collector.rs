//! Routing test samples through a forest and turning the leaves they reach
//! into predictions.

use std::collections::BTreeMap;

use rayon::ThreadPool;
use tracing::debug;

use super::{DefaultPredictionStrategy, OptimizedPredictionStrategy, Prediction, PredictionValues};
use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::node::NodeIndex;
use crate::utility::map_ranges;

/// Leaf lookup for every (tree, sample) pair.
pub(crate) struct TreeTraverser;

impl TreeTraverser {
    /// Leaf reached by each sample in each tree, `leaf_nodes[tree][sample]`.
    ///
    /// For out-of-bag prediction a tree skips the samples it was trained on.
    pub(crate) fn get_leaf_nodes(
        pool: &ThreadPool,
        forest: &Forest,
        data: &Data,
        oob_prediction: bool,
    ) -> Vec<Vec<Option<NodeIndex>>> {
        let trees = forest.trees();
        map_ranges(pool, trees.len(), |start, end| {
            trees[start..end]
                .iter()
                .map(|tree| {
                    let valid = Self::get_valid_samples(
                        data.num_rows(),
                        tree.drawn_samples(),
                        oob_prediction,
                    );
                    tree.find_leaf_nodes(data, &valid)
                })
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect()
    }

    /// `valid[sample][tree]`: whether `tree` may be used for `sample`.
    pub(crate) fn get_valid_trees_by_sample(
        forest: &Forest,
        data: &Data,
        oob_prediction: bool,
    ) -> Vec<Vec<bool>> {
        let num_trees = forest.trees().len();
        let mut valid = vec![vec![true; num_trees]; data.num_rows()];
        if oob_prediction {
            for (tree_index, tree) in forest.trees().iter().enumerate() {
                for &sample in tree.drawn_samples() {
                    if let Some(row) = valid.get_mut(sample) {
                        row[tree_index] = false;
                    }
                }
            }
        }
        valid
    }

    fn get_valid_samples(
        num_samples: usize,
        drawn_samples: &[usize],
        oob_prediction: bool,
    ) -> Vec<bool> {
        let mut valid = vec![true; num_samples];
        if oob_prediction {
            for &sample in drawn_samples {
                if let Some(flag) = valid.get_mut(sample) {
                    *flag = false;
                }
            }
        }
        valid
    }
}

/// Forest weights over training samples for one test sample.
pub(crate) struct SampleWeightComputer;

impl SampleWeightComputer {
    /// Every contributing tree spreads a unit of weight evenly over the leaf
    /// the sample reached; the result is normalized to sum to one.
    pub(crate) fn compute_weights(
        sample: usize,
        forest: &Forest,
        leaf_nodes_by_tree: &[Vec<Option<NodeIndex>>],
        valid_trees: &[bool],
    ) -> BTreeMap<usize, f64> {
        let mut weights_by_sample = BTreeMap::new();
        for (tree_index, tree) in forest.trees().iter().enumerate() {
            if !valid_trees[tree_index] {
                continue;
            }
            let Some(node) = leaf_nodes_by_tree[tree_index][sample] else {
                continue;
            };
            let samples = tree.nodes()[node.index()].samples();
            if samples.is_empty() {
                continue;
            }
            let sample_weight = 1.0 / samples.len() as f64;
            for &neighbor in samples {
                *weights_by_sample.entry(neighbor).or_insert(0.0) += sample_weight;
            }
        }

        let total: f64 = weights_by_sample.values().sum();
        if total > 0.0 {
            for weight in weights_by_sample.values_mut() {
                *weight /= total;
            }
        }
        weights_by_sample
    }
}

/// Inputs shared by every test sample of one prediction call.
pub(crate) struct CollectionInput<'a> {
    pub(crate) forest: &'a Forest,
    pub(crate) train_data: &'a Data,
    pub(crate) data: &'a Data,
    pub(crate) leaf_nodes_by_tree: &'a [Vec<Option<NodeIndex>>],
    pub(crate) valid_trees_by_sample: &'a [Vec<bool>],
    pub(crate) estimate_variance: bool,
    pub(crate) estimate_error: bool,
}

fn nan_prediction(length: usize, estimate_variance: bool, estimate_error: bool) -> Prediction {
    let nan = vec![f64::NAN; length];
    let variance = if estimate_variance { nan.clone() } else { Vec::new() };
    let error = if estimate_error { vec![f64::NAN] } else { Vec::new() };
    Prediction::new(nan, variance, error.clone(), error)
}

fn validate_prediction(sample: usize, expected: usize, got: usize) -> Result<(), ForestError> {
    if expected != got {
        return Err(ForestError::PredictionLengthMismatch {
            sample,
            expected,
            got,
        });
    }
    Ok(())
}

fn collect_in_batches<F>(
    pool: &ThreadPool,
    num_samples: usize,
    predict_one: F,
) -> Result<Vec<Prediction>, ForestError>
where
    F: Fn(usize) -> Result<Prediction, ForestError> + Sync,
{
    let batches = map_ranges(pool, num_samples, |start, end| {
        debug!(start, end, "collecting prediction batch");
        (start..end).map(&predict_one).collect::<Result<Vec<_>, _>>()
    });
    let mut predictions = Vec::with_capacity(num_samples);
    for batch in batches {
        predictions.extend(batch?);
    }
    Ok(predictions)
}

/// Averages precomputed leaf statistics over the leaves a sample reaches.
pub(crate) struct OptimizedPredictionCollector {
    strategy: Box<dyn OptimizedPredictionStrategy>,
}

impl OptimizedPredictionCollector {
    pub(crate) fn new(strategy: Box<dyn OptimizedPredictionStrategy>) -> Self {
        Self { strategy }
    }

    pub(crate) fn collect_predictions(
        &self,
        pool: &ThreadPool,
        input: &CollectionInput<'_>,
    ) -> Result<Vec<Prediction>, ForestError> {
        collect_in_batches(pool, input.data.num_rows(), |sample| {
            self.predict_sample(sample, input)
        })
    }

    fn predict_sample(
        &self,
        sample: usize,
        input: &CollectionInput<'_>,
    ) -> Result<Prediction, ForestError> {
        let strategy = self.strategy.as_ref();
        let width = strategy.prediction_value_length();
        let trees = input.forest.trees();
        let keep_leaf_values = input.estimate_variance || input.estimate_error;

        let mut average = vec![0.0; width];
        let mut leaf_values: Vec<Vec<f64>> = if keep_leaf_values {
            vec![Vec::new(); trees.len()]
        } else {
            Vec::new()
        };
        let mut num_leaves = 0usize;
        for (tree_index, tree) in trees.iter().enumerate() {
            if !input.valid_trees_by_sample[sample][tree_index] {
                continue;
            }
            let Some(node) = input.leaf_nodes_by_tree[tree_index][sample] else {
                continue;
            };
            let values = tree.prediction_values();
            if values.empty(node.index()) {
                continue;
            }
            num_leaves += 1;
            let leaf = values.get_values(node.index());
            for (total, value) in average.iter_mut().zip(leaf) {
                *total += value;
            }
            if keep_leaf_values {
                leaf_values[tree_index] = leaf.to_vec();
            }
        }

        if num_leaves == 0 {
            return Ok(nan_prediction(
                strategy.prediction_length(),
                input.estimate_variance,
                input.estimate_error,
            ));
        }
        for total in &mut average {
            *total /= num_leaves as f64;
        }

        let point = strategy.predict(&average);
        validate_prediction(sample, strategy.prediction_length(), point.len())?;

        let leaf_values = PredictionValues::new(leaf_values, width);
        let variance = if input.estimate_variance {
            strategy.compute_variance(&average, &leaf_values, input.forest.ci_group_size())
        } else {
            Vec::new()
        };
        let (error, excess_error) = if input.estimate_error {
            strategy
                .compute_error(sample, &average, &leaf_values, input.data)
                .first()
                .map_or((vec![f64::NAN], vec![f64::NAN]), |&(debiased, monte_carlo)| {
                    (vec![debiased], vec![monte_carlo])
                })
        } else {
            (Vec::new(), Vec::new())
        };
        Ok(Prediction::new(point, variance, error, excess_error))
    }
}

/// Hands forest weights over training samples to a default strategy.
pub(crate) struct DefaultPredictionCollector {
    strategy: Box<dyn DefaultPredictionStrategy>,
}

impl DefaultPredictionCollector {
    pub(crate) fn new(strategy: Box<dyn DefaultPredictionStrategy>) -> Self {
        Self { strategy }
    }

    pub(crate) fn collect_predictions(
        &self,
        pool: &ThreadPool,
        input: &CollectionInput<'_>,
    ) -> Result<Vec<Prediction>, ForestError> {
        collect_in_batches(pool, input.data.num_rows(), |sample| {
            self.predict_sample(sample, input)
        })
    }

    fn predict_sample(
        &self,
        sample: usize,
        input: &CollectionInput<'_>,
    ) -> Result<Prediction, ForestError> {
        let strategy = self.strategy.as_ref();
        let valid_trees = &input.valid_trees_by_sample[sample];
        let weights_by_sample = SampleWeightComputer::compute_weights(
            sample,
            input.forest,
            input.leaf_nodes_by_tree,
            valid_trees,
        );
        if weights_by_sample.is_empty() {
            return Ok(nan_prediction(
                strategy.prediction_length(),
                input.estimate_variance,
                false,
            ));
        }

        let point = strategy.predict(sample, &weights_by_sample, input.train_data, input.data);
        if point.is_empty() {
            return Ok(nan_prediction(
                strategy.prediction_length(),
                input.estimate_variance,
                false,
            ));
        }
        validate_prediction(sample, strategy.prediction_length(), point.len())?;

        let variance = if input.estimate_variance {
            let samples_by_tree: Vec<&[usize]> = input
                .forest
                .trees()
                .iter()
                .enumerate()
                .map(|(tree_index, tree)| match input.leaf_nodes_by_tree[tree_index][sample] {
                    Some(node) if valid_trees[tree_index] => tree.nodes()[node.index()].samples(),
                    _ => &[] as &[usize],
                })
                .collect();
            strategy.compute_variance(
                sample,
                &samples_by_tree,
                &weights_by_sample,
                input.train_data,
                input.data,
                input.forest.ci_group_size(),
            )
        } else {
            Vec::new()
        };
        Ok(Prediction::new(point, variance, Vec::new(), Vec::new()))
    }
}
