//! Splitting rules: choose the best `(variable, threshold, missing direction)`
//! for a node from its pseudo-outcomes.
//!
//! Every rule follows the same scan. The node samples are sorted by the
//! candidate variable (missing values first) and grouped into one bucket per
//! distinct value. Each prefix of buckets is then scored as a left child, once
//! with missing values sent left and once with them sent right. Splits never
//! fall inside a run of tied values.

mod causal;
mod multi_regression;
mod probability;
mod regression;
mod survival;

use ndarray::Array2;

use crate::data::Data;
use crate::tree_trainer::TreeOptions;

pub use causal::{
    CausalSurvivalSplittingRuleFactory, InstrumentalSplittingRuleFactory,
    MultiCausalSplittingRuleFactory,
};
pub use multi_regression::MultiRegressionSplittingRuleFactory;
pub use probability::ProbabilitySplittingRuleFactory;
pub use regression::RegressionSplittingRuleFactory;
pub use survival::SurvivalSplittingRuleFactory;

/// A chosen split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    /// Column to split on.
    pub var: usize,
    /// Samples with a value `<= value` go left.
    pub value: f64,
    /// Whether missing values go left.
    pub send_missing_left: bool,
}

/// Finds the best split of one node.
///
/// Rules hold scratch buffers and are created once per tree.
pub trait SplittingRule {
    /// Return the best split of `samples` over `possible_split_vars`, or
    /// `None` when no split improves on the node.
    fn find_best_split(
        &mut self,
        data: &Data,
        samples: &[usize],
        possible_split_vars: &[usize],
        responses: &Array2<f64>,
    ) -> Option<Split>;
}

/// Creates a fresh [`SplittingRule`] for each tree.
pub trait SplittingRuleFactory: Send + Sync {
    /// Build a rule sized for a table with at most `max_num_unique_values`
    /// distinct values per column.
    fn create(&self, max_num_unique_values: usize, options: &TreeOptions) -> Box<dyn SplittingRule>;
}

/// Running best split across variables and missing-value passes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BestSplit {
    var: usize,
    value: f64,
    decrease: f64,
    send_missing_left: bool,
}

impl BestSplit {
    pub(crate) fn new() -> Self {
        Self {
            var: 0,
            value: 0.0,
            decrease: 0.0,
            send_missing_left: true,
        }
    }

    /// Keep the candidate if it strictly beats the current best.
    pub(crate) fn consider(
        &mut self,
        var: usize,
        value: f64,
        decrease: f64,
        send_missing_left: bool,
    ) {
        if decrease > self.decrease {
            self.var = var;
            self.value = value;
            self.decrease = decrease;
            self.send_missing_left = send_missing_left;
        }
    }

    pub(crate) fn into_split(self) -> Option<Split> {
        (self.decrease > 0.0).then_some(Split {
            var: self.var,
            value: self.value,
            send_missing_left: self.send_missing_left,
        })
    }
}

/// Visit every sorted sample except the last with its bucket.
///
/// `None` is the missing-value bucket. Bucket `i` holds the samples whose
/// value is the `i`-th distinct value; when missing values exist bucket 0
/// stays empty because the first distinct value is NaN.
pub(crate) fn for_each_bucketed_sample(
    data: &Data,
    var: usize,
    sorted_samples: &[usize],
    mut visit: impl FnMut(Option<usize>, usize),
) {
    let mut split_index = 0;
    for pair in sorted_samples.windows(2) {
        let (sample, next_sample) = (pair[0], pair[1]);
        let value = data.get(sample, var);
        if value.is_nan() {
            visit(None, sample);
        } else {
            visit(Some(split_index), sample);
        }
        let next_value = data.get(next_sample, var);
        if value != next_value && !next_value.is_nan() {
            split_index += 1;
        }
    }
}

/// Zero the first `len` entries of a scratch buffer, growing it if needed.
pub(crate) fn reset<T: Clone + Default>(buffer: &mut Vec<T>, len: usize) {
    buffer.clear();
    buffer.resize(len, T::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_split_keeps_strict_improvements() {
        let mut best = BestSplit::new();
        assert!(best.into_split().is_none());
        best.consider(2, 1.5, 3.0, false);
        best.consider(4, 0.5, 3.0, true);
        best.consider(1, 9.0, -1.0, true);
        let split = best.into_split().unwrap();
        assert_eq!(split.var, 2);
        assert_eq!(split.value, 1.5);
        assert!(!split.send_missing_left);
    }

    #[test]
    fn buckets_follow_distinct_values() {
        let data = Data::from_rows(&[
            vec![f64::NAN],
            vec![1.0],
            vec![1.0],
            vec![2.0],
            vec![3.0],
        ])
        .unwrap();
        let (values, sorted) = data.get_all_values(&[0, 1, 2, 3, 4], 0);
        assert_eq!(values.len(), 4);
        let mut visits = Vec::new();
        for_each_bucketed_sample(&data, 0, &sorted, |bucket, sample| visits.push((bucket, sample)));
        assert_eq!(visits, vec![(None, 0), (Some(1), 1), (Some(1), 2), (Some(2), 3)]);
    }
}
