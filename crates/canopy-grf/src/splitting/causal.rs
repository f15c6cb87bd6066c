//! Splitting rules that guard against weak treatment or instrument variation.
//!
//! The score is the regression score on the pseudo-outcomes, but a split is
//! only admissible when each child keeps enough spread in a "strength"
//! variable: the instrument, the treatment(s), or, for causal survival, the
//! treatment together with a minimum number of observed events.

use ndarray::Array2;

use super::{BestSplit, Split, SplittingRule, SplittingRuleFactory, for_each_bucketed_sample, reset};
use crate::data::Data;
use crate::tree_trainer::TreeOptions;

/// Which per-sample variable must vary within each child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strength {
    Instrument,
    Treatments(usize),
    Treatment,
}

impl Strength {
    fn len(self) -> usize {
        match self {
            Self::Treatments(n) => n,
            Self::Instrument | Self::Treatment => 1,
        }
    }

    fn value(self, data: &Data, sample: usize, index: usize) -> f64 {
        match self {
            Self::Instrument => data.get_instrument(sample),
            Self::Treatments(_) => data.get_treatment_at(sample, index),
            Self::Treatment => data.get_treatment(sample),
        }
    }
}

/// How the imbalance penalty scales with the child sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Penalty {
    /// `1 / size_left + 1 / size_right`, sizes measured as strength variance.
    Variance,
    /// `1 / n_left + 1 / n_right`.
    Count,
}

/// Running sums for the left child.
#[derive(Debug, Default)]
struct ChildStats {
    count: usize,
    weight_sum: f64,
    failures: usize,
    sums: Vec<f64>,
    num_small: Vec<usize>,
    sums_z: Vec<f64>,
    sums_z_squared: Vec<f64>,
}

impl ChildStats {
    fn clear(&mut self, response_length: usize, num_strengths: usize) {
        self.count = 0;
        self.weight_sum = 0.0;
        self.failures = 0;
        reset(&mut self.sums, response_length);
        reset(&mut self.num_small, num_strengths);
        reset(&mut self.sums_z, num_strengths);
        reset(&mut self.sums_z_squared, num_strengths);
    }
}

/// Node-level quantities computed once per split search.
struct NodeStats {
    count: usize,
    weight_sum: f64,
    failures: usize,
    sums: Vec<f64>,
    num_small: Vec<usize>,
    sums_z: Vec<f64>,
    sums_z_squared: Vec<f64>,
    min_child_size: Vec<f64>,
}

/// Regression score with a strength guard on both children.
pub struct CausalSplittingRule {
    strength: Strength,
    penalty: Penalty,
    count_failures: bool,
    response_length: usize,
    min_node_size: usize,
    alpha: f64,
    imbalance_penalty: f64,
    // per-bucket accumulators; the bucket past the last value holds missing values
    counter: Vec<usize>,
    weight_sums: Vec<f64>,
    failures: Vec<usize>,
    sums: Vec<f64>,
    num_small: Vec<usize>,
    sums_z: Vec<f64>,
    sums_z_squared: Vec<f64>,
    left: ChildStats,
}

impl CausalSplittingRule {
    #[allow(clippy::too_many_arguments)]
    fn new(
        strength: Strength,
        penalty: Penalty,
        count_failures: bool,
        response_length: usize,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Self {
        let buckets = max_num_unique_values + 1;
        let num_strengths = strength.len();
        Self {
            strength,
            penalty,
            count_failures,
            response_length,
            min_node_size: options.min_node_size(),
            alpha: options.alpha(),
            imbalance_penalty: options.imbalance_penalty(),
            counter: Vec::with_capacity(buckets),
            weight_sums: Vec::with_capacity(buckets),
            failures: Vec::with_capacity(buckets),
            sums: Vec::with_capacity(buckets * response_length),
            num_small: Vec::with_capacity(buckets * num_strengths),
            sums_z: Vec::with_capacity(buckets * num_strengths),
            sums_z_squared: Vec::with_capacity(buckets * num_strengths),
            left: ChildStats::default(),
        }
    }

    fn node_stats(
        &self,
        data: &Data,
        samples: &[usize],
        responses: &Array2<f64>,
    ) -> Option<NodeStats> {
        let num_strengths = self.strength.len();
        let mut weight_sum = 0.0;
        let mut failures = 0;
        let mut sums = vec![0.0; self.response_length];
        let mut sums_z = vec![0.0; num_strengths];
        let mut sums_z_squared = vec![0.0; num_strengths];
        for &sample in samples {
            let weight = data.get_weight(sample);
            weight_sum += weight;
            if self.count_failures && data.is_failure(sample) {
                failures += 1;
            }
            for (r, total) in sums.iter_mut().enumerate() {
                *total += weight * responses[[sample, r]];
            }
            for t in 0..num_strengths {
                let z = self.strength.value(data, sample, t);
                sums_z[t] += weight * z;
                sums_z_squared[t] += weight * z * z;
            }
        }
        if weight_sum <= 0.0 {
            return None;
        }

        let mut num_small = vec![0usize; num_strengths];
        let mut min_child_size = vec![0.0; num_strengths];
        for t in 0..num_strengths {
            let mean_z = sums_z[t] / weight_sum;
            num_small[t] = samples
                .iter()
                .filter(|&&sample| self.strength.value(data, sample, t) < mean_z)
                .count();
            let size_node = sums_z_squared[t] - sums_z[t] * sums_z[t] / weight_sum;
            min_child_size[t] = size_node * self.alpha;
        }

        Some(NodeStats {
            count: samples.len(),
            weight_sum,
            failures,
            sums,
            num_small,
            sums_z,
            sums_z_squared,
            min_child_size,
        })
    }

    fn find_best_split_value(
        &mut self,
        data: &Data,
        var: usize,
        samples: &[usize],
        node: &NodeStats,
        responses: &Array2<f64>,
        best: &mut BestSplit,
    ) {
        let (possible_split_values, sorted_samples) = data.get_all_values(samples, var);
        if possible_split_values.len() < 2 {
            return;
        }
        let num_splits = possible_split_values.len() - 1;
        let missing = possible_split_values.len();
        let buckets = missing + 1;
        let response_length = self.response_length;
        let strength = self.strength;
        let num_strengths = strength.len();
        let count_failures = self.count_failures;

        reset(&mut self.counter, buckets);
        reset(&mut self.weight_sums, buckets);
        reset(&mut self.failures, buckets);
        reset(&mut self.sums, buckets * response_length);
        reset(&mut self.num_small, buckets * num_strengths);
        reset(&mut self.sums_z, buckets * num_strengths);
        reset(&mut self.sums_z_squared, buckets * num_strengths);

        let means: Vec<f64> = node.sums_z.iter().map(|z| z / node.weight_sum).collect();
        for_each_bucketed_sample(data, var, &sorted_samples, |bucket, sample| {
            let b = bucket.unwrap_or(missing);
            let weight = data.get_weight(sample);
            self.counter[b] += 1;
            self.weight_sums[b] += weight;
            if count_failures && data.is_failure(sample) {
                self.failures[b] += 1;
            }
            for r in 0..response_length {
                self.sums[b * response_length + r] += weight * responses[[sample, r]];
            }
            for (t, &mean) in means.iter().enumerate() {
                let z = strength.value(data, sample, t);
                let slot = b * num_strengths + t;
                self.sums_z[slot] += weight * z;
                self.sums_z_squared[slot] += weight * z * z;
                if z < mean {
                    self.num_small[slot] += 1;
                }
            }
        });

        let has_missing = self.counter[missing] > 0;
        for send_left in [true, false] {
            if !send_left && !has_missing {
                break;
            }
            self.left.clear(response_length, num_strengths);
            if send_left {
                self.add_bucket_to_left(missing);
            }

            for i in 0..num_splits {
                if i == 0 && !send_left {
                    continue;
                }
                self.add_bucket_to_left(i);
                match self.score(node) {
                    Admissible::Score(decrease) => {
                        best.consider(var, possible_split_values[i], decrease, send_left);
                    }
                    Admissible::Skip => {}
                    Admissible::Stop => break,
                }
            }
        }
    }

    fn add_bucket_to_left(&mut self, b: usize) {
        let response_length = self.response_length;
        let num_strengths = self.strength.len();
        let left = &mut self.left;
        left.count += self.counter[b];
        left.weight_sum += self.weight_sums[b];
        left.failures += self.failures[b];
        for r in 0..response_length {
            left.sums[r] += self.sums[b * response_length + r];
        }
        for t in 0..num_strengths {
            let slot = b * num_strengths + t;
            left.num_small[t] += self.num_small[slot];
            left.sums_z[t] += self.sums_z[slot];
            left.sums_z_squared[t] += self.sums_z_squared[slot];
        }
    }

    /// Score the current left child against the rest of the node.
    fn score(&self, node: &NodeStats) -> Admissible {
        let left = &self.left;
        let n_left = left.count;
        let n_right = node.count - n_left;

        // both children need strength values on either side of the node mean
        for &left_small in &left.num_small {
            if left_small < self.min_node_size || n_left - left_small < self.min_node_size {
                return Admissible::Skip;
            }
        }
        for (t, &node_small) in node.num_small.iter().enumerate() {
            let right_small = node_small - left.num_small[t];
            if right_small < self.min_node_size || n_right - right_small < self.min_node_size {
                return Admissible::Stop;
            }
        }

        if self.count_failures {
            if left.failures < self.min_node_size {
                return Admissible::Skip;
            }
            if node.failures - left.failures < self.min_node_size {
                return Admissible::Stop;
            }
        }

        let weight_sum_right = node.weight_sum - left.weight_sum;
        if left.weight_sum <= 0.0 || weight_sum_right <= 0.0 {
            return Admissible::Skip;
        }
        let num_strengths = node.num_small.len();
        let mut size_left = vec![0.0; num_strengths];
        let mut size_right = vec![0.0; num_strengths];
        for t in 0..num_strengths {
            size_left[t] =
                left.sums_z_squared[t] - left.sums_z[t] * left.sums_z[t] / left.weight_sum;
            let z_right = node.sums_z[t] - left.sums_z[t];
            size_right[t] = node.sums_z_squared[t]
                - left.sums_z_squared[t]
                - z_right * z_right / weight_sum_right;
        }
        let too_small = |sizes: &[f64]| {
            sizes.iter().zip(&node.min_child_size).any(|(size, min)| size < min)
                || (self.imbalance_penalty > 0.0 && sizes.iter().all(|&size| size == 0.0))
        };
        if too_small(&size_left) || too_small(&size_right) {
            return Admissible::Skip;
        }

        let mut decrease = 0.0;
        for (r, &sum_left) in left.sums.iter().enumerate() {
            let sum_right = node.sums[r] - sum_left;
            decrease +=
                sum_left * sum_left / left.weight_sum + sum_right * sum_right / weight_sum_right;
        }
        decrease -= self.imbalance_penalty
            * match self.penalty {
                // single strength variable in variance mode
                Penalty::Variance => 1.0 / size_left[0] + 1.0 / size_right[0],
                Penalty::Count => 1.0 / n_left as f64 + 1.0 / n_right as f64,
            };
        Admissible::Score(decrease)
    }
}

/// Outcome of checking one candidate boundary.
enum Admissible {
    Score(f64),
    /// Left child too small; later boundaries may work.
    Skip,
    /// Right child too small; every later boundary is worse.
    Stop,
}

impl SplittingRule for CausalSplittingRule {
    fn find_best_split(
        &mut self,
        data: &Data,
        samples: &[usize],
        possible_split_vars: &[usize],
        responses: &Array2<f64>,
    ) -> Option<Split> {
        let node = self.node_stats(data, samples, responses)?;
        let mut best = BestSplit::new();
        for &var in possible_split_vars {
            self.find_best_split_value(data, var, samples, &node, responses, &mut best);
        }
        best.into_split()
    }
}

/// Builds instrument-strength rules for the instrumental forest.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentalSplittingRuleFactory;

impl SplittingRuleFactory for InstrumentalSplittingRuleFactory {
    fn create(
        &self,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(CausalSplittingRule::new(
            Strength::Instrument,
            Penalty::Variance,
            false,
            1,
            max_num_unique_values,
            options,
        ))
    }
}

/// Builds treatment-strength rules over `num_treatments` treatments and
/// `response_length` pseudo-outcome columns.
#[derive(Debug, Clone, Copy)]
pub struct MultiCausalSplittingRuleFactory {
    response_length: usize,
    num_treatments: usize,
}

impl MultiCausalSplittingRuleFactory {
    #[must_use]
    pub fn new(response_length: usize, num_treatments: usize) -> Self {
        Self {
            response_length,
            num_treatments,
        }
    }
}

impl SplittingRuleFactory for MultiCausalSplittingRuleFactory {
    fn create(
        &self,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(CausalSplittingRule::new(
            Strength::Treatments(self.num_treatments.max(1)),
            Penalty::Count,
            false,
            self.response_length.max(1),
            max_num_unique_values,
            options,
        ))
    }
}

/// Builds treatment-strength rules that also require observed events in
/// each child.
#[derive(Debug, Clone, Copy, Default)]
pub struct CausalSurvivalSplittingRuleFactory;

impl SplittingRuleFactory for CausalSurvivalSplittingRuleFactory {
    fn create(
        &self,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(CausalSplittingRule::new(
            Strength::Treatment,
            Penalty::Variance,
            true,
            1,
            max_num_unique_values,
            options,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Columns: covariate, outcome, treatment.
    fn treated_data() -> Data {
        let mut rows = Vec::new();
        for i in 0..12 {
            let x = i as f64;
            let w = (i % 2) as f64;
            let y = if i < 6 { 0.0 } else { 4.0 * w };
            rows.push(vec![x, y, w]);
        }
        Data::from_rows(&rows)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
            .with_treatment_index(2)
            .unwrap()
            .with_instrument_index(2)
            .unwrap()
    }

    fn options(min_node_size: usize) -> TreeOptions {
        TreeOptions::default()
            .with_min_node_size(min_node_size)
            .with_alpha(0.05)
    }

    /// Pseudo-outcomes that jump where the effect switches on.
    fn effect_responses(data: &Data) -> Array2<f64> {
        Array2::from_shape_fn((data.num_rows(), 1), |(row, _)| if row < 6 { -1.0 } else { 1.0 })
    }

    #[test]
    fn instrumental_rule_finds_the_effect_boundary() {
        let data = treated_data();
        let samples: Vec<usize> = (0..12).collect();
        let mut rule =
            InstrumentalSplittingRuleFactory.create(data.max_num_unique_values(), &options(1));
        let split = rule
            .find_best_split(&data, &samples, &[0], &effect_responses(&data))
            .unwrap();
        assert_eq!(split.var, 0);
        assert_eq!(split.value, 5.0);
    }

    #[test]
    fn children_need_strength_on_both_sides_of_the_mean() {
        let data = treated_data();
        let samples: Vec<usize> = (0..12).collect();
        // each child would need four treated and four control samples
        let mut rule =
            InstrumentalSplittingRuleFactory.create(data.max_num_unique_values(), &options(4));
        assert!(
            rule.find_best_split(&data, &samples, &[0], &effect_responses(&data))
                .is_none()
        );
    }

    #[test]
    fn multi_causal_rule_with_one_treatment_matches_instrumental_boundary() {
        let data = treated_data();
        let samples: Vec<usize> = (0..12).collect();
        let mut rule = MultiCausalSplittingRuleFactory::new(1, 1)
            .create(data.max_num_unique_values(), &options(1));
        let split = rule
            .find_best_split(&data, &samples, &[0], &effect_responses(&data))
            .unwrap();
        assert_eq!(split.value, 5.0);
    }

    #[test]
    fn causal_survival_rule_requires_events_in_each_child() {
        // covariate, outcome, treatment, censor; events only at x >= 8
        let rows: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                let x = i as f64;
                vec![x, x, (i % 2) as f64, if i >= 8 { 1.0 } else { 0.0 }]
            })
            .collect();
        let data = Data::from_rows(&rows)
            .unwrap()
            .with_outcome_index(1)
            .unwrap()
            .with_treatment_index(2)
            .unwrap()
            .with_censor_index(3)
            .unwrap();
        let samples: Vec<usize> = (0..12).collect();
        let responses = effect_responses(&data);
        let mut rule =
            CausalSurvivalSplittingRuleFactory.create(data.max_num_unique_values(), &options(1));
        let split = rule.find_best_split(&data, &samples, &[0], &responses).unwrap();
        // the left child must contain at least one event
        assert!(split.value >= 8.0);
    }
}
