use ndarray::Array2;

use super::RelabelingStrategy;
use crate::data::Data;

/// Passes the raw outcome through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRelabelingStrategy;

impl RelabelingStrategy for NoopRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        for &sample in samples {
            responses[[sample, 0]] = data.get_outcome(sample);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_outcomes_of_node_samples_only() {
        let data = Data::from_rows(&[vec![1.0, 5.0], vec![2.0, 6.0], vec![3.0, 7.0]])
            .unwrap()
            .with_outcome_index(1)
            .unwrap();
        let mut responses = Array2::zeros((3, 1));
        assert!(!NoopRelabelingStrategy.relabel(&[0, 2], &data, &mut responses));
        assert_eq!(responses.column(0).to_vec(), vec![5.0, 0.0, 7.0]);
    }
}
