use ndarray::Array2;

use super::RelabelingStrategy;
use crate::data::Data;

/// Passes a vector outcome through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct MultiNoopRelabelingStrategy {
    num_outcomes: usize,
}

impl MultiNoopRelabelingStrategy {
    #[must_use]
    pub fn new(num_outcomes: usize) -> Self {
        Self { num_outcomes }
    }
}

impl RelabelingStrategy for MultiNoopRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        for &sample in samples {
            for (j, outcome) in data.get_outcomes(sample).into_iter().enumerate() {
                responses[[sample, j]] = outcome;
            }
        }
        false
    }

    fn response_length(&self) -> usize {
        self.num_outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_every_outcome_column() {
        let data = Data::from_rows(&[vec![0.1, 1.0, 2.0], vec![0.2, 3.0, 4.0]])
            .unwrap()
            .with_outcome_indices(&[2, 1])
            .unwrap();
        let strategy = MultiNoopRelabelingStrategy::new(2);
        let mut responses = Array2::zeros((2, strategy.response_length()));
        assert!(!strategy.relabel(&[0, 1], &data, &mut responses));
        assert_eq!(responses.row(0).to_vec(), vec![2.0, 1.0]);
        assert_eq!(responses.row(1).to_vec(), vec![4.0, 3.0]);
    }
}
