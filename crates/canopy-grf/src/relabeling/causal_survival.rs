use ndarray::Array2;

use super::RelabelingStrategy;
use crate::data::Data;
use crate::utility::equal_doubles;

/// Residuals of the ratio of precomputed survival numerator and denominator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CausalSurvivalRelabelingStrategy;

impl RelabelingStrategy for CausalSurvivalRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        let mut numerator_sum = 0.0;
        let mut denominator_sum = 0.0;
        let mut sum_weight = 0.0;
        for &sample in samples {
            let weight = data.get_weight(sample);
            numerator_sum += weight * data.get_causal_survival_numerator(sample);
            denominator_sum += weight * data.get_causal_survival_denominator(sample);
            sum_weight += weight;
        }
        if equal_doubles(denominator_sum, 0.0, 1.0e-10) || sum_weight.abs() <= 1e-16 {
            return true;
        }

        let tau = numerator_sum / denominator_sum;
        for &sample in samples {
            responses[[sample, 0]] = (data.get_causal_survival_numerator(sample)
                - data.get_causal_survival_denominator(sample) * tau)
                / denominator_sum;
        }
        false
    }
}
