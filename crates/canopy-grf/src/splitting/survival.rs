use ndarray::Array2;

use super::{BestSplit, Split, SplittingRule, SplittingRuleFactory};
use crate::data::Data;
use crate::tree_trainer::TreeOptions;

/// Log-rank splits for right-censored survival outcomes.
///
/// The node's distinct failure times `t_1 < ... < t_m` relabel every sample
/// to an index in `0..=m` (index 0 is "before the first failure"). For a
/// candidate left child the statistic is
///
/// ```text
/// (sum_k d_kl - Y_kl d_k / Y_k)^2 / sum_k Y_kl (Y_k - Y_kl) (Y_k - d_k) d_k / ((Y_k - 1) Y_k^2)
/// ```
///
/// with `d` failures and `Y` samples at risk. Each child needs at least
/// `max(ceil(alpha * n), 1)` failures.
pub struct SurvivalSplittingRule {
    alpha: f64,
    relabeled: Vec<usize>,
    left_count_failure: Vec<usize>,
    left_count_censor: Vec<usize>,
}

/// Per-node risk-set tables shared by every candidate variable.
struct RiskSets {
    num_failures: usize,
    num_failures_node: usize,
    at_risk: Vec<f64>,
    numerator_weights: Vec<f64>,
    denominator_weights: Vec<f64>,
}

impl RiskSets {
    fn logrank(
        &self,
        n_left: usize,
        left_count_failure: &[usize],
        left_count_censor: &[usize],
    ) -> f64 {
        let mut numerator = 0.0;
        let mut denominator = 0.0;
        let mut left_exited = 0usize;
        for time in 1..=self.num_failures {
            left_exited += left_count_failure[time - 1] + left_count_censor[time - 1];
            let left_at_risk = n_left.saturating_sub(left_exited);
            if left_at_risk == 0 {
                break;
            }
            let at_risk = self.at_risk[time];
            if at_risk < 2.0 {
                break;
            }
            let left_at_risk = left_at_risk as f64;
            numerator +=
                left_count_failure[time] as f64 - left_at_risk * self.numerator_weights[time];
            denominator += left_at_risk * (at_risk - left_at_risk) * self.denominator_weights[time];
        }
        if denominator > 0.0 {
            numerator * numerator / denominator
        } else {
            0.0
        }
    }
}

impl SurvivalSplittingRule {
    pub(crate) fn new(alpha: f64) -> Self {
        Self {
            alpha,
            relabeled: Vec::new(),
            left_count_failure: Vec::new(),
            left_count_censor: Vec::new(),
        }
    }

    /// Relabel the node's samples onto its failure-time grid and tabulate
    /// the risk sets. `None` when there are fewer than two failure times.
    fn risk_sets(
        &mut self,
        data: &Data,
        samples: &[usize],
        responses: &Array2<f64>,
    ) -> Option<RiskSets> {
        let mut failure_values: Vec<f64> = samples
            .iter()
            .filter(|&&sample| data.is_failure(sample))
            .map(|&sample| responses[[sample, 0]])
            .collect();
        let num_failures_node = failure_values.len();
        failure_values.sort_by(f64::total_cmp);
        failure_values.dedup();
        let num_failures = failure_values.len();
        if num_failures <= 1 {
            return None;
        }

        let mut count_failure = vec![0usize; num_failures + 1];
        let mut count_censor = vec![0usize; num_failures + 1];
        if self.relabeled.len() < data.num_rows() {
            self.relabeled.resize(data.num_rows(), 0);
        }
        for &sample in samples {
            let time = responses[[sample, 0]];
            let relabeled = failure_values.partition_point(|&v| v <= time);
            self.relabeled[sample] = relabeled;
            if data.is_failure(sample) {
                count_failure[relabeled] += 1;
            } else {
                count_censor[relabeled] += 1;
            }
        }

        let mut at_risk = vec![0.0; num_failures + 1];
        let mut numerator_weights = vec![0.0; num_failures + 1];
        let mut denominator_weights = vec![0.0; num_failures + 1];
        at_risk[0] = samples.len() as f64;
        for time in 1..=num_failures {
            at_risk[time] =
                at_risk[time - 1] - count_failure[time - 1] as f64 - count_censor[time - 1] as f64;
            let y = at_risk[time];
            let d = count_failure[time] as f64;
            if y > 0.0 {
                numerator_weights[time] = d / y;
            }
            if y > 1.0 {
                denominator_weights[time] = (y - d) / (y - 1.0) * d / (y * y);
            }
        }

        Some(RiskSets {
            num_failures,
            num_failures_node,
            at_risk,
            numerator_weights,
            denominator_weights,
        })
    }

    fn find_best_split_value(
        &mut self,
        data: &Data,
        var: usize,
        samples: &[usize],
        risk_sets: &RiskSets,
        min_child_size: usize,
        best: &mut BestSplit,
    ) {
        let (possible_split_values, sorted_samples) = data.get_all_values(samples, var);
        if possible_split_values.len() < 2 {
            return;
        }
        let n_missing = sorted_samples
            .iter()
            .take_while(|&&sample| data.get(sample, var).is_nan())
            .count();
        let last = sorted_samples.len() - 1;

        for send_left in [true, false] {
            if !send_left && n_missing == 0 {
                break;
            }
            super::reset(&mut self.left_count_failure, risk_sets.num_failures + 1);
            super::reset(&mut self.left_count_censor, risk_sets.num_failures + 1);
            let mut n_left = 0usize;
            let mut num_failures_left = 0usize;

            // missing values either all start on the left or never join it
            if send_left {
                for &sample in &sorted_samples[..n_missing] {
                    self.add_left(data, sample, &mut n_left, &mut num_failures_left);
                }
            }

            let start = if send_left && n_missing > 0 {
                n_missing - 1
            } else {
                n_missing
            };
            for i in start..last {
                let sample = sorted_samples[i];
                let value = data.get(sample, var);
                if !value.is_nan() {
                    self.add_left(data, sample, &mut n_left, &mut num_failures_left);
                }
                let next_value = data.get(sorted_samples[i + 1], var);
                if value == next_value {
                    continue;
                }

                if num_failures_left < min_child_size {
                    continue;
                }
                if risk_sets.num_failures_node - num_failures_left < min_child_size {
                    break;
                }

                let logrank =
                    risk_sets.logrank(n_left, &self.left_count_failure, &self.left_count_censor);
                best.consider(var, value, logrank, send_left);
            }
        }
    }

    fn add_left(
        &mut self,
        data: &Data,
        sample: usize,
        n_left: &mut usize,
        num_failures_left: &mut usize,
    ) {
        let time = self.relabeled[sample];
        *n_left += 1;
        if data.is_failure(sample) {
            self.left_count_failure[time] += 1;
            *num_failures_left += 1;
        } else {
            self.left_count_censor[time] += 1;
        }
    }
}

impl SplittingRule for SurvivalSplittingRule {
    fn find_best_split(
        &mut self,
        data: &Data,
        samples: &[usize],
        possible_split_vars: &[usize],
        responses: &Array2<f64>,
    ) -> Option<Split> {
        let min_child_size = ((samples.len() as f64 * self.alpha).ceil() as usize).max(1);
        let risk_sets = self.risk_sets(data, samples, responses)?;

        let mut best = BestSplit::new();
        for &var in possible_split_vars {
            self.find_best_split_value(data, var, samples, &risk_sets, min_child_size, &mut best);
        }
        best.into_split()
    }
}

/// Builds [`SurvivalSplittingRule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurvivalSplittingRuleFactory;

impl SplittingRuleFactory for SurvivalSplittingRuleFactory {
    fn create(
        &self,
        _max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(SurvivalSplittingRule::new(options.alpha()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Columns: covariate, follow-up time, event indicator.
    fn survival_data(rows: &[[f64; 3]]) -> (Data, Array2<f64>) {
        let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
        let data = Data::from_rows(&rows)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
            .with_censor_index(2)
            .unwrap();
        let responses =
            Array2::from_shape_fn((data.num_rows(), 1), |(row, _)| data.get_outcome(row));
        (data, responses)
    }

    #[test]
    fn splits_off_the_earliest_failures() {
        let (data, responses) = survival_data(&[
            [1.0, 1.0, 1.0],
            [2.0, 2.0, 1.0],
            [3.0, 3.0, 1.0],
            [4.0, 4.0, 1.0],
            [5.0, 10.0, 1.0],
            [6.0, 11.0, 1.0],
            [7.0, 12.0, 1.0],
            [8.0, 13.0, 1.0],
        ]);
        let samples: Vec<usize> = (0..8).collect();
        let mut rule = SurvivalSplittingRule::new(0.05);
        let split = rule.find_best_split(&data, &samples, &[0], &responses).unwrap();
        // the statistic peaks with the two earliest failures on the left
        assert_eq!(split.var, 0);
        assert_eq!(split.value, 2.0);
    }

    #[test]
    fn single_failure_time_gives_no_split() {
        let (data, responses) = survival_data(&[
            [1.0, 5.0, 1.0],
            [2.0, 5.0, 1.0],
            [3.0, 7.0, 0.0],
            [4.0, 9.0, 0.0],
        ]);
        let mut rule = SurvivalSplittingRule::new(0.05);
        assert!(rule.find_best_split(&data, &[0, 1, 2, 3], &[0], &responses).is_none());
    }

    #[test]
    fn every_split_needs_failures_on_both_sides() {
        // with alpha = 0.5 each child needs two failures but the node has two
        let (data, responses) = survival_data(&[
            [1.0, 1.0, 1.0],
            [2.0, 2.0, 1.0],
            [3.0, 8.0, 0.0],
            [4.0, 9.0, 0.0],
        ]);
        let mut rule = SurvivalSplittingRule::new(0.5);
        assert!(rule.find_best_split(&data, &[0, 1, 2, 3], &[0], &responses).is_none());
    }

    #[test]
    fn risk_sets_count_censoring_before_the_first_failure() {
        let (data, responses) = survival_data(&[
            [1.0, 0.5, 0.0],
            [2.0, 1.0, 1.0],
            [3.0, 2.0, 1.0],
            [4.0, 3.0, 0.0],
        ]);
        let mut rule = SurvivalSplittingRule::new(0.05);
        let risk_sets = rule.risk_sets(&data, &[0, 1, 2, 3], &responses).unwrap();
        assert_eq!(risk_sets.num_failures, 2);
        assert_eq!(risk_sets.num_failures_node, 2);
        assert_eq!(risk_sets.at_risk, vec![4.0, 3.0, 2.0]);
    }
}
