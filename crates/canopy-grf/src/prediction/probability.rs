use super::debiaser::jackknife_leaf_values;
use super::{OptimizedPredictionStrategy, PredictionValues, weighted_leaf_sums};
use crate::data::Data;

/// Class probabilities from per-leaf class weights.
///
/// Leaf layout: `[mean weight of class 0, .., of class K-1, mean weight]`.
#[derive(Debug, Clone, Copy)]
pub struct ProbabilityPredictionStrategy {
    num_classes: usize,
}

impl ProbabilityPredictionStrategy {
    #[must_use]
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    fn weight_index(&self) -> usize {
        self.num_classes
    }
}

impl OptimizedPredictionStrategy for ProbabilityPredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, average: &[f64]) -> Vec<f64> {
        let weight_bar = average[self.weight_index()];
        average[..self.num_classes]
            .iter()
            .map(|class_weight| class_weight / weight_bar)
            .collect()
    }

    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64> {
        let weight_index = self.weight_index();
        let weight_bar = average[weight_index];
        let probabilities = self.predict(average);
        jackknife_leaf_values(leaf_values, ci_group_size, self.num_classes, |leaf| {
            probabilities
                .iter()
                .enumerate()
                .map(|(class, p)| (leaf[class] - p * leaf[weight_index]) / weight_bar)
                .collect()
        })
    }

    fn prediction_value_length(&self) -> usize {
        self.num_classes + 1
    }

    fn precompute_prediction_values(
        &self,
        leaf_samples: &[&[usize]],
        data: &Data,
    ) -> PredictionValues {
        let num_classes = self.num_classes;
        let values = leaf_samples
            .iter()
            .map(|leaf| {
                weighted_leaf_sums(leaf, data, num_classes, |sample, weight, sums| {
                    // labels were checked at training time
                    let class = (data.get_outcome(sample) as usize).min(num_classes - 1);
                    sums[class] += weight;
                })
                .map_or_else(Vec::new, |(sums, weight_sum)| {
                    let size = leaf.len() as f64;
                    let mut value: Vec<f64> = sums.iter().map(|sum| sum / size).collect();
                    value.push(weight_sum / size);
                    value
                })
            })
            .collect();
        PredictionValues::new(values, num_classes + 1)
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
    fn probabilities_follow_class_weights() {
        let data = Data::from_rows(&[
            vec![0.0, 1.0],
            vec![1.0, 1.0],
            vec![1.0, 2.0],
            vec![2.0, 0.0],
        ])
        .unwrap()
        .with_outcome_index(0)
        .unwrap()
        .with_weight_index(1)
        .unwrap();
        let strategy = ProbabilityPredictionStrategy::new(3);
        let leaf: &[usize] = &[0, 1, 2, 3];
        let values = strategy.precompute_prediction_values(&[leaf], &data);
        let probabilities = strategy.predict(values.get_values(0));
        assert_abs_diff_eq!(probabilities[0], 0.25);
        assert_abs_diff_eq!(probabilities[1], 0.75);
        assert_abs_diff_eq!(probabilities[2], 0.0);
    }

    #[test]
    fn zero_weight_leaves_are_empty() {
        let data = Data::from_rows(&[vec![1.0, 0.0]])
            .unwrap()
            .with_outcome_index(0)
            .unwrap()
            .with_weight_index(1)
            .unwrap();
        let leaf: &[usize] = &[0];
        let values =
            ProbabilityPredictionStrategy::new(2).precompute_prediction_values(&[leaf], &data);
        assert!(values.empty(0));
    }

    #[test]
    fn variance_has_one_entry_per_class() {
        let strategy = ProbabilityPredictionStrategy::new(2);
        let values = PredictionValues::new(
            vec![
                vec![1.0, 0.0, 1.0],
                vec![0.5, 0.5, 1.0],
                vec![0.0, 1.0, 1.0],
                vec![0.25, 0.75, 1.0],
            ],
            3,
        );
        let average = [0.4375, 0.5625, 1.0];
        let variance = strategy.compute_variance(&average, &values, 2);
        assert_eq!(variance.len(), 2);
        assert!(variance.iter().all(|v| *v > 0.0));
        // with two classes the two probabilities move in lockstep
        assert_abs_diff_eq!(variance[0], variance[1], epsilon = 1e-12);
    }
}
