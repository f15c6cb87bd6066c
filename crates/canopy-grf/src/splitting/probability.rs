use ndarray::Array2;

use super::{BestSplit, Split, SplittingRule, SplittingRuleFactory, for_each_bucketed_sample, reset};
use crate::data::Data;
use crate::tree_trainer::TreeOptions;

/// Multinomial impurity splits on class-label pseudo-outcomes.
///
/// Score: `|left class weights|^2 / n_left + |right class weights|^2 / n_right`,
/// less the imbalance penalty.
pub struct ProbabilitySplittingRule {
    num_classes: usize,
    alpha: f64,
    imbalance_penalty: f64,
    counter: Vec<usize>,
    counter_per_class: Vec<f64>,
}

impl ProbabilitySplittingRule {
    pub(crate) fn new(
        max_num_unique_values: usize,
        num_classes: usize,
        alpha: f64,
        imbalance_penalty: f64,
    ) -> Self {
        Self {
            num_classes,
            alpha,
            imbalance_penalty,
            counter: Vec::with_capacity(max_num_unique_values),
            counter_per_class: Vec::with_capacity(max_num_unique_values * num_classes),
        }
    }

    fn class_of(&self, responses: &Array2<f64>, sample: usize) -> usize {
        let label = responses[[sample, 0]].round().max(0.0) as usize;
        label.min(self.num_classes - 1)
    }

    #[allow(clippy::too_many_arguments)]
    fn find_best_split_value(
        &mut self,
        data: &Data,
        var: usize,
        samples: &[usize],
        class_counts: &[f64],
        min_child_size: usize,
        responses: &Array2<f64>,
        best: &mut BestSplit,
    ) {
        let (possible_split_values, sorted_samples) = data.get_all_values(samples, var);
        if possible_split_values.len() < 2 {
            return;
        }
        let num_splits = possible_split_values.len() - 1;
        let num_classes = self.num_classes;
        let size_node = samples.len();

        reset(&mut self.counter, possible_split_values.len());
        reset(&mut self.counter_per_class, possible_split_values.len() * num_classes);
        let mut n_missing = 0usize;
        let mut class_counts_missing = vec![0.0; num_classes];

        let classes: Vec<usize> = sorted_samples
            .iter()
            .map(|&sample| self.class_of(responses, sample))
            .collect();
        let mut position = 0;
        for_each_bucketed_sample(data, var, &sorted_samples, |bucket, sample| {
            let class = classes[position];
            position += 1;
            let weight = data.get_weight(sample);
            match bucket {
                None => {
                    n_missing += 1;
                    class_counts_missing[class] += weight;
                }
                Some(b) => {
                    self.counter[b] += 1;
                    self.counter_per_class[b * num_classes + class] += weight;
                }
            }
        });

        let mut class_counts_left = vec![0.0; num_classes];
        for send_left in [true, false] {
            if !send_left && n_missing == 0 {
                break;
            }
            let mut n_left = if send_left {
                class_counts_left.copy_from_slice(&class_counts_missing);
                n_missing
            } else {
                class_counts_left.fill(0.0);
                0
            };

            for i in 0..num_splits {
                if i == 0 && !send_left {
                    continue;
                }
                n_left += self.counter[i];
                for (c, count) in class_counts_left.iter_mut().enumerate() {
                    *count += self.counter_per_class[i * num_classes + c];
                }

                let n_right = size_node - n_left;
                if n_right < min_child_size {
                    break;
                }
                if n_left < min_child_size {
                    continue;
                }

                let sum_left: f64 = class_counts_left.iter().map(|c| c * c).sum();
                let sum_right: f64 = class_counts
                    .iter()
                    .zip(&class_counts_left)
                    .map(|(node, left)| (node - left) * (node - left))
                    .sum();
                let decrease = sum_left / n_left as f64 + sum_right / n_right as f64
                    - self.imbalance_penalty * (1.0 / n_left as f64 + 1.0 / n_right as f64);
                best.consider(var, possible_split_values[i], decrease, send_left);
            }
        }
    }
}

impl SplittingRule for ProbabilitySplittingRule {
    fn find_best_split(
        &mut self,
        data: &Data,
        samples: &[usize],
        possible_split_vars: &[usize],
        responses: &Array2<f64>,
    ) -> Option<Split> {
        let min_child_size = ((samples.len() as f64 * self.alpha).ceil() as usize).max(1);

        let mut class_counts = vec![0.0; self.num_classes];
        for &sample in samples {
            class_counts[self.class_of(responses, sample)] += data.get_weight(sample);
        }

        let mut best = BestSplit::new();
        for &var in possible_split_vars {
            self.find_best_split_value(
                data,
                var,
                samples,
                &class_counts,
                min_child_size,
                responses,
                &mut best,
            );
        }
        best.into_split()
    }
}

/// Builds [`ProbabilitySplittingRule`]s for a fixed number of classes.
#[derive(Debug, Clone, Copy)]
pub struct ProbabilitySplittingRuleFactory {
    num_classes: usize,
}

impl ProbabilitySplittingRuleFactory {
    #[must_use]
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }
}

impl SplittingRuleFactory for ProbabilitySplittingRuleFactory {
    fn create(
        &self,
        max_num_unique_values: usize,
        options: &TreeOptions,
    ) -> Box<dyn SplittingRule> {
        Box::new(ProbabilitySplittingRule::new(
            max_num_unique_values,
            self.num_classes.max(1),
            options.alpha(),
            options.imbalance_penalty(),
        ))
    }
}
