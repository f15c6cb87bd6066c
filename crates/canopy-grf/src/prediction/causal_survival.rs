use super::debiaser::jackknife_leaf_values;
use super::{OptimizedPredictionStrategy, PredictionValues, weighted_leaf_sums};
use crate::data::Data;

const NUMERATOR: usize = 0;
const DENOMINATOR: usize = 1;
const NUM_TYPES: usize = 2;

/// Ratio of the leaf-averaged causal survival numerator and denominator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CausalSurvivalPredictionStrategy;

impl OptimizedPredictionStrategy for CausalSurvivalPredictionStrategy {
    fn prediction_length(&self) -> usize {
        1
    }

    fn predict(&self, average: &[f64]) -> Vec<f64> {
        vec![average[NUMERATOR] / average[DENOMINATOR]]
    }

    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64> {
        let denominator = average[DENOMINATOR];
        let tau = average[NUMERATOR] / denominator;
        let variance = jackknife_leaf_values(leaf_values, ci_group_size, 1, |leaf| {
            vec![leaf[NUMERATOR] - leaf[DENOMINATOR] * tau]
        });
        vec![variance[0] / (denominator * denominator)]
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
                weighted_leaf_sums(leaf, data, NUM_TYPES, |sample, weight, sums| {
                    sums[NUMERATOR] += weight * data.get_causal_survival_numerator(sample);
                    sums[DENOMINATOR] += weight * data.get_causal_survival_denominator(sample);
                })
                .map_or_else(Vec::new, |(sums, _)| {
                    let size = leaf.len() as f64;
                    vec![sums[NUMERATOR] / size, sums[DENOMINATOR] / size]
                })
            })
            .collect();
        PredictionValues::new(values, NUM_TYPES)
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

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn predicts_the_ratio_of_leaf_means() {
        let data = Data::from_rows(&[vec![2.0, 1.0], vec![4.0, 3.0]])
            .unwrap()
            .with_causal_survival_numerator_index(0)
            .unwrap()
            .with_causal_survival_denominator_index(1)
            .unwrap();
        let leaf: &[usize] = &[0, 1];
        let values =
            CausalSurvivalPredictionStrategy.precompute_prediction_values(&[leaf], &data);
        assert_eq!(values.get_values(0), &[3.0, 2.0]);
        assert_abs_diff_eq!(CausalSurvivalPredictionStrategy.predict(values.get_values(0))[0], 1.5);
    }

    #[test]
    fn variance_scales_with_the_numerator() {
        let values = PredictionValues::new(
            vec![vec![1.0, 1.0], vec![3.0, 1.5], vec![-1.0, 0.5], vec![2.0, 1.0]],
            2,
        );
        let scaled = PredictionValues::new(
            vec![vec![3.0, 1.0], vec![9.0, 1.5], vec![-3.0, 0.5], vec![6.0, 1.0]],
            2,
        );
        let first = CausalSurvivalPredictionStrategy.compute_variance(&[1.25, 1.0], &values, 2);
        let second = CausalSurvivalPredictionStrategy.compute_variance(&[3.75, 1.0], &scaled, 2);
        assert!(first[0] > 0.0);
        assert_abs_diff_eq!(first[0] * 9.0, second[0], epsilon = 1e-10);
    }
}
