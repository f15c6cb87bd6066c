use super::debiaser::jackknife_leaf_values;
use super::{OptimizedPredictionStrategy, PredictionValues, weighted_leaf_sums};
use crate::data::Data;

const OUTCOME: usize = 0;
const TREATMENT: usize = 1;
const INSTRUMENT: usize = 2;
const OUTCOME_INSTRUMENT: usize = 3;
const TREATMENT_INSTRUMENT: usize = 4;
const INSTRUMENT_SQUARED: usize = 5;
const WEIGHT: usize = 6;
const NUM_TYPES: usize = 7;

/// Local average treatment effect from leaf-averaged moments.
///
/// Leaves store weighted means of `Y, W, Z, YZ, WZ, Z^2` and the mean
/// weight; the estimate is the ratio of the reduced form to the first
/// stage, `(YZ*w - Y*Z) / (WZ*w - W*Z)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentalPredictionStrategy;

/// Effect and intercept implied by one vector of statistics.
fn effect_and_intercept(values: &[f64]) -> (f64, f64) {
    let reduced_form =
        values[OUTCOME_INSTRUMENT] * values[WEIGHT] - values[OUTCOME] * values[INSTRUMENT];
    let first_stage =
        values[TREATMENT_INSTRUMENT] * values[WEIGHT] - values[TREATMENT] * values[INSTRUMENT];
    let effect = reduced_form / first_stage;
    let intercept = (values[OUTCOME] - values[TREATMENT] * effect) / values[WEIGHT];
    (effect, intercept)
}

impl OptimizedPredictionStrategy for InstrumentalPredictionStrategy {
    fn prediction_length(&self) -> usize {
        1
    }

    fn predict(&self, average: &[f64]) -> Vec<f64> {
        vec![effect_and_intercept(average).0]
    }

    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64> {
        let (effect, intercept) = effect_and_intercept(average);
        let first_stage = average[TREATMENT_INSTRUMENT] * average[WEIGHT]
            - average[TREATMENT] * average[INSTRUMENT];

        jackknife_leaf_values(leaf_values, ci_group_size, 1, |leaf| {
            let psi_instrument = leaf[OUTCOME_INSTRUMENT]
                - leaf[TREATMENT_INSTRUMENT] * effect
                - leaf[INSTRUMENT] * intercept;
            let psi_level =
                leaf[OUTCOME] - leaf[TREATMENT] * effect - leaf[WEIGHT] * intercept;
            vec![(average[WEIGHT] * psi_instrument - average[INSTRUMENT] * psi_level) / first_stage]
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
                weighted_leaf_sums(leaf, data, NUM_TYPES - 1, |sample, weight, sums| {
                    let outcome = data.get_outcome(sample);
                    let treatment = data.get_treatment(sample);
                    let instrument = data.get_instrument(sample);
                    sums[OUTCOME] += weight * outcome;
                    sums[TREATMENT] += weight * treatment;
                    sums[INSTRUMENT] += weight * instrument;
                    sums[OUTCOME_INSTRUMENT] += weight * outcome * instrument;
                    sums[TREATMENT_INSTRUMENT] += weight * treatment * instrument;
                    sums[INSTRUMENT_SQUARED] += weight * instrument * instrument;
                })
                .map_or_else(Vec::new, |(sums, weight_sum)| {
                    let size = leaf.len() as f64;
                    let mut value: Vec<f64> = sums.iter().map(|sum| sum / size).collect();
                    value.push(weight_sum / size);
                    value
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
        let outcome = data.get_outcome(sample);
        let treatment = data.get_treatment(sample);
        let residual_of = |values: &[f64]| {
            let (effect, intercept) = effect_and_intercept(values);
            outcome - intercept - treatment * effect
        };

        let residual = residual_of(average);
        let tree_residuals: Vec<f64> = (0..leaf_values.num_nodes())
            .filter(|&node| !leaf_values.empty(node))
            .map(|node| residual_of(leaf_values.get_values(node)))
            .filter(|r| r.is_finite())
            .collect();
        let num_trees = tree_residuals.len() as f64;
        if num_trees <= 1.0 {
            return vec![(f64::NAN, f64::NAN)];
        }

        let spread: f64 = tree_residuals
            .iter()
            .map(|r| (r - residual) * (r - residual))
            .sum();
        let monte_carlo = spread / (num_trees * (num_trees - 1.0));
        vec![(residual * residual - monte_carlo, monte_carlo)]
    }
}
