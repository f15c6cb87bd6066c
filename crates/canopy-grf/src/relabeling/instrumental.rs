use ndarray::Array2;

use super::RelabelingStrategy;
use crate::data::Data;
use crate::utility::equal_doubles;

/// Local average treatment effect residuals.
///
/// The instrument is regularized toward the treatment by
/// `reduced_form_weight`: 0 uses the instrument alone, 1 the treatment alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentalRelabelingStrategy {
    reduced_form_weight: f64,
}

impl InstrumentalRelabelingStrategy {
    #[must_use]
    pub fn new(reduced_form_weight: f64) -> Self {
        Self {
            reduced_form_weight,
        }
    }

    fn regularized_instrument(&self, data: &Data, sample: usize) -> f64 {
        (1.0 - self.reduced_form_weight) * data.get_instrument(sample)
            + self.reduced_form_weight * data.get_treatment(sample)
    }
}

impl RelabelingStrategy for InstrumentalRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        let mut sum_weight = 0.0;
        let mut total_outcome = 0.0;
        let mut total_treatment = 0.0;
        let mut total_instrument = 0.0;
        for &sample in samples {
            let weight = data.get_weight(sample);
            total_outcome += weight * data.get_outcome(sample);
            total_treatment += weight * data.get_treatment(sample);
            total_instrument += weight * data.get_instrument(sample);
            sum_weight += weight;
        }
        if sum_weight.abs() <= 1e-16 {
            return true;
        }

        let average_outcome = total_outcome / sum_weight;
        let average_treatment = total_treatment / sum_weight;
        let average_instrument = total_instrument / sum_weight;
        let average_regularized = (1.0 - self.reduced_form_weight) * average_instrument
            + self.reduced_form_weight * average_treatment;

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for &sample in samples {
            let weight = data.get_weight(sample);
            let centered_instrument =
                self.regularized_instrument(data, sample) - average_regularized;
            numerator +=
                weight * centered_instrument * (data.get_outcome(sample) - average_outcome);
            denominator +=
                weight * centered_instrument * (data.get_treatment(sample) - average_treatment);
        }
        if equal_doubles(denominator, 0.0, 1.0e-10) {
            return true;
        }

        let local_average_treatment_effect = numerator / denominator;
        for &sample in samples {
            let residual = (data.get_outcome(sample) - average_outcome)
                - local_average_treatment_effect * (data.get_treatment(sample) - average_treatment);
            let centered_instrument =
                self.regularized_instrument(data, sample) - average_regularized;
            responses[[sample, 0]] = centered_instrument * residual;
        }
        false
    }
}
