use ndarray::Array2;

use super::RelabelingStrategy;
use crate::data::Data;

/// Labels each sample with the index of the node quantile bucket its
/// outcome falls into, for a classification-style splitting rule.
#[derive(Debug, Clone)]
pub struct QuantileRelabelingStrategy {
    quantiles: Vec<f64>,
}

impl QuantileRelabelingStrategy {
    /// Bucket boundaries depend only on the set of quantiles, so they are
    /// kept sorted.
    #[must_use]
    pub fn new(mut quantiles: Vec<f64>) -> Self {
        quantiles.sort_by(f64::total_cmp);
        Self { quantiles }
    }
}

impl RelabelingStrategy for QuantileRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        if samples.is_empty() {
            return true;
        }
        let mut sorted_outcomes: Vec<f64> = samples.iter().map(|&s| data.get_outcome(s)).collect();
        sorted_outcomes.sort_by(f64::total_cmp);

        let num_samples = sorted_outcomes.len();
        let mut cutoffs: Vec<f64> = self
            .quantiles
            .iter()
            .map(|&q| {
                let index = ((num_samples as f64) * q).ceil() as usize;
                sorted_outcomes[index.saturating_sub(1).min(num_samples - 1)]
            })
            .collect();
        cutoffs.dedup();

        for &sample in samples {
            let outcome = data.get_outcome(sample);
            let bucket = cutoffs.partition_point(|&cutoff| cutoff < outcome);
            responses[[sample, 0]] = bucket as f64;
        }
        false
    }
}
