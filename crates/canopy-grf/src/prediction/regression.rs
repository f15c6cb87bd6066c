use super::debiaser::jackknife_leaf_values;
use super::{OptimizedPredictionStrategy, PredictionValues, weighted_leaf_sums};
use crate::data::Data;

const OUTCOME: usize = 0;
const WEIGHT: usize = 1;
const NUM_TYPES: usize = 2;

/// Weighted mean outcome of the leaves.
///
/// Leaf statistics are `[sum(w * y) / n, sum(w) / n]`; dividing by the leaf
/// size keeps every tree on the same scale whatever its leaf sizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionPredictionStrategy;

impl OptimizedPredictionStrategy for RegressionPredictionStrategy {
    fn prediction_length(&self) -> usize {
        1
    }

    fn predict(&self, average: &[f64]) -> Vec<f64> {
        vec![average[OUTCOME] / average[WEIGHT]]
    }

    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64> {
        let weight_bar = average[WEIGHT];
        let average_outcome = average[OUTCOME] / weight_bar;
        jackknife_leaf_values(leaf_values, ci_group_size, 1, |leaf| {
            vec![(leaf[OUTCOME] - average_outcome * leaf[WEIGHT]) / weight_bar]
        })
    }

    fn prediction_value_length(&self) -> usize {
        NUM_TYPES
    }

    fn precompute_prediction_values(
        &self,
        leaf_samples: &[&[usize]],
        data: &Data,
    ) -> PredictionValues {
        let values = leaf_samples
            .iter()
            .map(|leaf| {
                weighted_leaf_sums(leaf, data, 1, |sample, weight, sums| {
                    sums[OUTCOME] += weight * data.get_outcome(sample);
                })
                .map_or_else(Vec::new, |(sums, weight_sum)| {
                    let size = leaf.len() as f64;
                    vec![sums[OUTCOME] / size, weight_sum / size]
                })
            })
            .collect();
        PredictionValues::new(values, NUM_TYPES)
    }

    fn compute_error(
        &self,
        sample: usize,
        average: &[f64],
        leaf_values: &PredictionValues,
        data: &Data,
    ) -> Vec<(f64, f64)> {
        let prediction = average[OUTCOME] / average[WEIGHT];
        let error = prediction - data.get_outcome(sample);
        let mse = error * error;

        let tree_predictions: Vec<f64> = (0..leaf_values.num_nodes())
            .filter(|&node| !leaf_values.empty(node))
            .map(|node| leaf_values.get(node, OUTCOME) / leaf_values.get(node, WEIGHT))
            .collect();
        let num_trees = tree_predictions.len() as f64;
        if num_trees <= 1.0 {
            return vec![(f64::NAN, f64::NAN)];
        }

        // Monte Carlo spread of the finite forest around its infinite limit
        let spread: f64 = tree_predictions
            .iter()
            .map(|p| (p - prediction) * (p - prediction))
            .sum();
        let monte_carlo = spread / (num_trees * (num_trees - 1.0));
        vec![(mse - monte_carlo, monte_carlo)]
    }
}

/// Per-outcome weighted means, the vector form of
/// [`RegressionPredictionStrategy`].
///
/// Leaf statistics: `[mean(w * y_1), .., mean(w * y_M), mean(w)]`.
#[derive(Debug, Clone, Copy)]
pub struct MultiRegressionPredictionStrategy {
    num_outcomes: usize,
}

impl MultiRegressionPredictionStrategy {
    #[must_use]
    pub fn new(num_outcomes: usize) -> Self {
        Self { num_outcomes }
    }
}

impl OptimizedPredictionStrategy for MultiRegressionPredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.num_outcomes
    }

    fn predict(&self, average: &[f64]) -> Vec<f64> {
        let weight_bar = average[self.num_outcomes];
        average[..self.num_outcomes]
            .iter()
            .map(|value| value / weight_bar)
            .collect()
    }

    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64> {
        let num_outcomes = self.num_outcomes;
        let weight_bar = average[num_outcomes];
        let means: Vec<f64> = self.predict(average);
        jackknife_leaf_values(leaf_values, ci_group_size, num_outcomes, |leaf| {
            means
                .iter()
                .enumerate()
                .map(|(j, mean)| (leaf[j] - mean * leaf[num_outcomes]) / weight_bar)
                .collect()
        })
    }

    fn prediction_value_length(&self) -> usize {
        self.num_outcomes + 1
    }

    fn precompute_prediction_values(
        &self,
        leaf_samples: &[&[usize]],
        data: &Data,
    ) -> PredictionValues {
        let num_outcomes = self.num_outcomes;
        let values = leaf_samples
            .iter()
            .map(|leaf| {
                weighted_leaf_sums(leaf, data, num_outcomes, |sample, weight, sums| {
                    for (sum, outcome) in sums.iter_mut().zip(data.get_outcomes(sample)) {
                        *sum += weight * outcome;
                    }
                })
                .map_or_else(Vec::new, |(sums, weight_sum)| {
                    let size = leaf.len() as f64;
                    let mut value: Vec<f64> = sums.iter().map(|sum| sum / size).collect();
                    value.push(weight_sum / size);
                    value
                })
            })
            .collect();
        PredictionValues::new(values, num_outcomes + 1)
    }

    fn compute_error(
        &self,
        _sample: usize,
        _average: &[f64],
        _leaf_values: &PredictionValues,
        _data: &Data,
    ) -> Vec<(f64, f64)> {
        vec![(f64::NAN, f64::NAN)]
    }
}
