use ndarray::Array2;

use super::{BestSplit, Split, SplittingRule, SplittingRuleFactory, for_each_bucketed_sample, reset};
use crate::data::Data;
use crate::tree_trainer::TreeOptions;

/// Variance-reduction splits on a scalar pseudo-outcome.
///
/// Score: `sum_left^2 / weight_left + sum_right^2 / weight_right`, less
/// `imbalance_penalty * (1 / n_left + 1 / n_right)`. Each child needs at
/// least `max(ceil(alpha * n), 1)` samples.
pub struct RegressionSplittingRule {
    alpha: f64,
    imbalance_penalty: f64,
    counter: Vec<usize>,
    sums: Vec<f64>,
    weight_sums: Vec<f64>,
}

impl RegressionSplittingRule {
    pub(crate) fn new(max_num_unique_values: usize, alpha: f64, imbalance_penalty: f64) -> Self {
        Self {
            alpha,
            imbalance_penalty,
            counter: Vec::with_capacity(max_num_unique_values),
            sums: Vec::with_capacity(max_num_unique_values),
            weight_sums: Vec::with_capacity(max_num_unique_values),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn find_best_split_value(
        &mut self,
        data: &Data,
        var: usize,
        samples: &[usize],
        weight_sum_node: f64,
        sum_node: f64,
        min_child_size: usize,
        responses: &Array2<f64>,
        best: &mut BestSplit,
    ) {
        let (possible_split_values, sorted_samples) = data.get_all_values(samples, var);
        if possible_split_values.len() < 2 {
            return;
        }
        let num_splits = possible_split_values.len() - 1;
        let size_node = samples.len();

        reset(&mut self.counter, possible_split_values.len());
        reset(&mut self.sums, possible_split_values.len());
        reset(&mut self.weight_sums, possible_split_values.len());
        let mut n_missing = 0usize;
        let mut weight_sum_missing = 0.0;
        let mut sum_missing = 0.0;

        for_each_bucketed_sample(data, var, &sorted_samples, |bucket, sample| {
            let weight = data.get_weight(sample);
            let response = responses[[sample, 0]];
            match bucket {
                None => {
                    n_missing += 1;
                    weight_sum_missing += weight;
                    sum_missing += weight * response;
                }
                Some(b) => {
                    self.counter[b] += 1;
                    self.weight_sums[b] += weight;
                    self.sums[b] += weight * response;
                }
            }
        });

        for send_left in [true, false] {
            if !send_left && n_missing == 0 {
                break;
            }
            let (mut n_left, mut weight_sum_left, mut sum_left) = if send_left {
                (n_missing, weight_sum_missing, sum_missing)
            } else {
                (0, 0.0, 0.0)
            };

            for i in 0..num_splits {
                // sending NaN right at the first split is the same as not splitting
                if i == 0 && !send_left {
                    continue;
                }
                n_left += self.counter[i];
                weight_sum_left += self.weight_sums[i];
                sum_left += self.sums[i];

                if n_left < min_child_size {
                    continue;
                }
                let n_right = size_node - n_left;
                if n_right < min_child_size {
                    break;
                }

                let weight_sum_right = weight_sum_node - weight_sum_left;
                let sum_right = sum_node - sum_left;
                let decrease = sum_left * sum_left / weight_sum_left
                    + sum_right * sum_right / weight_sum_right
                    - self.imbalance_penalty * (1.0 / n_left as f64 + 1.0 / n_right as f64);
                best.consider(var, possible_split_values[i], decrease, send_left);
            }
        }
    }
}

impl SplittingRule for RegressionSplittingRule {
    fn find_best_split(
        &mut self,
        data: &Data,
        samples: &[usize],
        possible_split_vars: &[usize],
        responses: &Array2<f64>,
    ) -> Option<Split> {
        let min_child_size = ((samples.len() as f64 * self.alpha).ceil() as usize).max(1);

        let mut weight_sum_node = 0.0;
        let mut sum_node = 0.0;
        for &sample in samples {
            let weight = data.get_weight(sample);
            weight_sum_node += weight;
            sum_node += weight * responses[[sample, 0]];
        }

        let mut best = BestSplit::new();
        for &var in possible_split_vars {
            self.find_best_split_value(
                data,
                var,
                samples,
                weight_sum_node,
                sum_node,
                min_child_size,
                responses,
                &mut best,
            );
        }
        best.into_split()
    }
}

/// Builds [`RegressionSplittingRule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionSplittingRuleFactory;

impl SplittingRuleFactory for RegressionSplittingRuleFactory {
    fn create(
        &self,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(RegressionSplittingRule::new(
            max_num_unique_values,
            options.alpha(),
            options.imbalance_penalty(),
        ))
    }
}
