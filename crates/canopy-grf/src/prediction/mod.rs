//! Prediction strategies and the collectors that feed them.
//!
//! Two families exist. An [`OptimizedPredictionStrategy`] condenses every
//! leaf into a fixed-width vector of sufficient statistics at training time;
//! prediction averages those vectors over the leaves a test sample reaches.
//! A [`DefaultPredictionStrategy`] instead receives the forest weights over
//! training samples and works on the raw training rows.

mod causal_survival;
pub(crate) mod collector;
mod debiaser;
mod instrumental;
mod local_linear;
mod multi_causal;
mod probability;
mod quantile;
mod regression;
mod survival;
mod values;

use std::collections::BTreeMap;

use crate::data::Data;

pub use causal_survival::CausalSurvivalPredictionStrategy;
pub use debiaser::ObjectiveBayesDebiaser;
pub use instrumental::InstrumentalPredictionStrategy;
pub use local_linear::{LLCausalPredictionStrategy, LocalLinearPredictionStrategy};
pub use multi_causal::MultiCausalPredictionStrategy;
pub use probability::ProbabilityPredictionStrategy;
pub use quantile::QuantilePredictionStrategy;
pub use regression::{MultiRegressionPredictionStrategy, RegressionPredictionStrategy};
pub use survival::{SurvivalPredictionKind, SurvivalPredictionStrategy};
pub use values::{Prediction, PredictionValues};

/// Total leaf weight at or below this is treated as an empty leaf.
pub(crate) const MIN_LEAF_WEIGHT: f64 = 1e-16;

/// A strategy that precomputes leaf statistics during training.
pub trait OptimizedPredictionStrategy: Send + Sync {
    /// Number of values in one prediction.
    fn prediction_length(&self) -> usize;

    /// Close the estimating equation on leaf statistics averaged over trees.
    fn predict(&self, average: &[f64]) -> Vec<f64>;

    /// Grouped jackknife variance of the estimate.
    ///
    /// `leaf_values` has one node per tree of the forest, in forest order;
    /// a tree that did not contribute is an empty node.
    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64>;

    /// Width of the per-leaf statistics vector.
    fn prediction_value_length(&self) -> usize;

    /// Compute the statistics of every node of a tree.
    ///
    /// `leaf_samples` is indexed by node; split nodes and nodes without
    /// samples (or without weight) yield an empty entry.
    fn precompute_prediction_values(&self, leaf_samples: &[&[usize]], data: &Data)
    -> PredictionValues;

    /// Out-of-bag `(debiased_error, monte_carlo_error)` for one sample.
    fn compute_error(
        &self,
        sample: usize,
        average: &[f64],
        leaf_values: &PredictionValues,
        data: &Data,
    ) -> Vec<(f64, f64)>;
}

/// A strategy that works from forest weights over training samples.
pub trait DefaultPredictionStrategy: Send + Sync {
    /// Number of values in one prediction.
    fn prediction_length(&self) -> usize;

    /// Predict test row `sample` of `data` from normalized forest weights.
    fn predict(
        &self,
        sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
    ) -> Vec<f64>;

    /// Grouped jackknife variance. `samples_by_tree` holds, per tree, the
    /// training samples of the leaf the test row reached (empty when the
    /// tree did not contribute).
    fn compute_variance(
        &self,
        sample: usize,
        samples_by_tree: &[&[usize]],
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
        ci_group_size: usize,
    ) -> Vec<f64>;
}

/// Sum `f(sample)` and the sample weight over a leaf.
///
/// Returns `None` for an empty leaf or one whose total weight vanishes.
pub(crate) fn weighted_leaf_sums<F>(
    leaf: &[usize],
    data: &Data,
    width: usize,
    mut f: F,
) -> Option<(Vec<f64>, f64)>
where
    F: FnMut(usize, f64, &mut [f64]),
{
    if leaf.is_empty() {
        return None;
    }
    let mut sums = vec![0.0; width];
    let mut weight_sum = 0.0;
    for &sample in leaf {
        let weight = data.get_weight(sample);
        f(sample, weight, &mut sums);
        weight_sum += weight;
    }
    if weight_sum.abs() <= MIN_LEAF_WEIGHT {
        return None;
    }
    Some((sums, weight_sum))
}
