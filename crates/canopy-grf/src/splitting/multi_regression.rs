use ndarray::Array2;

use super::{BestSplit, Split, SplittingRule, SplittingRuleFactory, for_each_bucketed_sample, reset};
use crate::data::Data;
use crate::tree_trainer::TreeOptions;

/// Regression splits on a vector pseudo-outcome; the score is summed over
/// response columns.
pub struct MultiRegressionSplittingRule {
    alpha: f64,
    imbalance_penalty: f64,
    num_outcomes: usize,
    counter: Vec<usize>,
    weight_sums: Vec<f64>,
    sums: Vec<f64>,
}

impl MultiRegressionSplittingRule {
    pub(crate) fn new(
        max_num_unique_values: usize,
        alpha: f64,
        imbalance_penalty: f64,
        num_outcomes: usize,
    ) -> Self {
        Self {
            alpha,
            imbalance_penalty,
            num_outcomes,
            counter: Vec::with_capacity(max_num_unique_values),
            weight_sums: Vec::with_capacity(max_num_unique_values),
            sums: Vec::with_capacity(max_num_unique_values * num_outcomes),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn find_best_split_value(
        &mut self,
        data: &Data,
        var: usize,
        samples: &[usize],
        weight_sum_node: f64,
        sum_node: &[f64],
        min_child_size: usize,
        responses: &Array2<f64>,
        best: &mut BestSplit,
    ) {
        let (possible_split_values, sorted_samples) = data.get_all_values(samples, var);
        if possible_split_values.len() < 2 {
            return;
        }
        let num_splits = possible_split_values.len() - 1;
        let num_outcomes = self.num_outcomes;
        let size_node = samples.len();

        reset(&mut self.counter, possible_split_values.len());
        reset(&mut self.weight_sums, possible_split_values.len());
        reset(&mut self.sums, possible_split_values.len() * num_outcomes);
        let mut n_missing = 0usize;
        let mut weight_sum_missing = 0.0;
        let mut sum_missing = vec![0.0; num_outcomes];

        for_each_bucketed_sample(data, var, &sorted_samples, |bucket, sample| {
            let weight = data.get_weight(sample);
            match bucket {
                None => {
                    n_missing += 1;
                    weight_sum_missing += weight;
                    for (k, total) in sum_missing.iter_mut().enumerate() {
                        *total += weight * responses[[sample, k]];
                    }
                }
                Some(b) => {
                    self.counter[b] += 1;
                    self.weight_sums[b] += weight;
                    for k in 0..num_outcomes {
                        self.sums[b * num_outcomes + k] += weight * responses[[sample, k]];
                    }
                }
            }
        });

        let mut sum_left = vec![0.0; num_outcomes];
        for send_left in [true, false] {
            if !send_left && n_missing == 0 {
                break;
            }
            let (mut n_left, mut weight_sum_left) = if send_left {
                sum_left.copy_from_slice(&sum_missing);
                (n_missing, weight_sum_missing)
            } else {
                sum_left.fill(0.0);
                (0, 0.0)
            };

            for i in 0..num_splits {
                if i == 0 && !send_left {
                    continue;
                }
                n_left += self.counter[i];
                weight_sum_left += self.weight_sums[i];
                for (k, total) in sum_left.iter_mut().enumerate() {
                    *total += self.sums[i * num_outcomes + k];
                }

                if n_left < min_child_size {
                    continue;
                }
                let n_right = size_node - n_left;
                if n_right < min_child_size {
                    break;
                }

                let weight_sum_right = weight_sum_node - weight_sum_left;
                let mut decrease = 0.0;
                for (k, &left) in sum_left.iter().enumerate() {
                    let right = sum_node[k] - left;
                    decrease += left * left / weight_sum_left + right * right / weight_sum_right;
                }
                decrease -= self.imbalance_penalty * (1.0 / n_left as f64 + 1.0 / n_right as f64);
                best.consider(var, possible_split_values[i], decrease, send_left);
            }
        }
    }
}

impl SplittingRule for MultiRegressionSplittingRule {
    fn find_best_split(
        &mut self,
        data: &Data,
        samples: &[usize],
        possible_split_vars: &[usize],
        responses: &Array2<f64>,
    ) -> Option<Split> {
        let min_child_size = ((samples.len() as f64 * self.alpha).ceil() as usize).max(1);

        let mut weight_sum_node = 0.0;
        let mut sum_node = vec![0.0; self.num_outcomes];
        for &sample in samples {
            let weight = data.get_weight(sample);
            weight_sum_node += weight;
            for (k, total) in sum_node.iter_mut().enumerate() {
                *total += weight * responses[[sample, k]];
            }
        }

        let mut best = BestSplit::new();
        for &var in possible_split_vars {
            self.find_best_split_value(
                data,
                var,
                samples,
                weight_sum_node,
                &sum_node,
                min_child_size,
                responses,
                &mut best,
            );
        }
        best.into_split()
    }
}

/// Builds [`MultiRegressionSplittingRule`]s for a fixed response width.
#[derive(Debug, Clone, Copy)]
pub struct MultiRegressionSplittingRuleFactory {
    num_outcomes: usize,
}

impl MultiRegressionSplittingRuleFactory {
    #[must_use]
    pub fn new(num_outcomes: usize) -> Self {
        Self { num_outcomes }
    }
}

impl SplittingRuleFactory for MultiRegressionSplittingRuleFactory {
    fn create(
        &self,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(MultiRegressionSplittingRule::new(
            max_num_unique_values,
            options.alpha(),
            options.imbalance_penalty(),
            self.num_outcomes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_column_matches_scalar_rule() {
        let data = Data::from_rows(&[vec![1.0], vec![1.0], vec![2.0], vec![2.0], vec![3.0]])
            .unwrap();
        let responses =
            Array2::from_shape_vec((5, 1), vec![10.0, 10.0, 0.0, 0.0, 0.0]).unwrap();
        let mut rule = MultiRegressionSplittingRule::new(3, 0.05, 0.0, 1);
        let split = rule.find_best_split(&data, &[0, 1, 2, 3, 4], &[0], &responses).unwrap();
        assert_eq!(split.value, 1.0);
    }

    #[test]
    fn second_outcome_can_drive_the_split() {
        let data = Data::from_rows(&[vec![1.0], vec![2.0], vec![3.0], vec![4.0]]).unwrap();
        // first outcome is flat, second jumps after x = 3
        let responses = Array2::from_shape_vec(
            (4, 2),
            vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 5.0],
        )
        .unwrap();
        let mut rule = MultiRegressionSplittingRule::new(4, 0.0, 0.0, 2);
        let split = rule.find_best_split(&data, &[0, 1, 2, 3], &[0], &responses).unwrap();
        assert_eq!(split.value, 3.0);
    }
}
