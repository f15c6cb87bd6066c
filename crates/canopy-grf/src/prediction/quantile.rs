use std::collections::BTreeMap;

use super::DefaultPredictionStrategy;
use crate::data::Data;

/// Weighted empirical quantiles of the training outcomes.
///
/// Quantiles may be given in any order, and predictions follow that order.
#[derive(Debug, Clone)]
pub struct QuantilePredictionStrategy {
    quantiles: Vec<f64>,
    /// Positions of `quantiles` in ascending order.
    ascending: Vec<usize>,
}

impl QuantilePredictionStrategy {
    #[must_use]
    pub fn new(quantiles: Vec<f64>) -> Self {
        let mut ascending: Vec<usize> = (0..quantiles.len()).collect();
        ascending.sort_by(|&a, &b| quantiles[a].total_cmp(&quantiles[b]));
        Self {
            quantiles,
            ascending,
        }
    }

    fn compute_quantile_cutoffs(
        &self,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
    ) -> Vec<f64> {
        let mut sample_weights: Vec<(f64, f64)> = weights_by_sample
            .iter()
            .map(|(&sample, &weight)| (train_data.get_outcome(sample), weight))
            .collect();
        sample_weights.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut cutoffs = Vec::with_capacity(self.quantiles.len());
        let mut quantiles = self.ascending.iter().map(|&i| self.quantiles[i]).peekable();
        let mut cumulative_weight = 0.0;
        for &(outcome, weight) in &sample_weights {
            cumulative_weight += weight;
            while quantiles.next_if(|&q| cumulative_weight >= q).is_some() {
                cutoffs.push(outcome);
            }
            if quantiles.peek().is_none() {
                break;
            }
        }

        // rounding can leave the top quantiles just above the total weight
        if let Some(&(last_outcome, _)) = sample_weights.last() {
            cutoffs.extend(quantiles.map(|_| last_outcome));
        }
        if cutoffs.len() < self.quantiles.len() {
            return vec![f64::NAN; self.quantiles.len()];
        }

        let mut in_caller_order = vec![0.0; self.quantiles.len()];
        for (&position, cutoff) in self.ascending.iter().zip(cutoffs) {
            in_caller_order[position] = cutoff;
        }
        in_caller_order
    }
}

impl DefaultPredictionStrategy for QuantilePredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.quantiles.len()
    }

    fn predict(
        &self,
        _sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        _data: &Data,
    ) -> Vec<f64> {
        self.compute_quantile_cutoffs(weights_by_sample, train_data)
    }

    fn compute_variance(
        &self,
        _sample: usize,
        _samples_by_tree: &[&[usize]],
        _weights_by_sample: &BTreeMap<usize, f64>,
        _train_data: &Data,
        _data: &Data,
        _ci_group_size: usize,
    ) -> Vec<f64> {
        vec![f64::NAN; self.quantiles.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEIGHTS: [f64; 10] = [0.0, 0.1, 0.2, 0.1, 0.1, 0.1, 0.2, 0.1, 0.0, 0.1];

    fn fixture(outcomes: &[f64]) -> (BTreeMap<usize, f64>, Data) {
        let weights = WEIGHTS.iter().copied().enumerate().collect();
        let rows: Vec<Vec<f64>> = outcomes.iter().map(|&y| vec![y]).collect();
        let data = Data::from_rows(&rows).unwrap().with_outcome_index(0).unwrap();
        (weights, data)
    }

    const OUTCOMES: [f64; 10] = [
        -9.99984, -7.36924, 5.11211, -0.826997, 0.655345, -5.62082, -9.05911, 3.57729, 3.58593,
        8.69386,
    ];

    #[test]
    fn simple_quantile_prediction() {
        let (weights, data) = fixture(&OUTCOMES);
        let strategy = QuantilePredictionStrategy::new(vec![0.25, 0.5, 0.75]);
        let predictions = strategy.predict(0, &weights, &data, &data);
        assert_eq!(predictions, vec![-7.36924, -0.826997, 5.11211]);
    }

    #[test]
    fn descending_quantiles_keep_caller_order() {
        let (weights, data) = fixture(&OUTCOMES);
        let strategy = QuantilePredictionStrategy::new(vec![0.75, 0.25]);
        let predictions = strategy.predict(0, &weights, &data, &data);
        assert_eq!(predictions, vec![5.11211, -7.36924]);

        let shuffled = QuantilePredictionStrategy::new(vec![0.5, 0.75, 0.25]);
        let predictions = shuffled.predict(0, &weights, &data, &data);
        assert_eq!(predictions, vec![-0.826997, 5.11211, -7.36924]);
    }

    #[test]
    fn empty_weights_predict_nan() {
        let (_, data) = fixture(&OUTCOMES);
        let strategy = QuantilePredictionStrategy::new(vec![0.25, 0.75]);
        let predictions = strategy.predict(0, &BTreeMap::new(), &data, &data);
        assert_eq!(predictions.len(), 2);
        assert!(predictions.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn skewed_quantiles_stay_in_range() {
        let outcomes = [
            -1.99984, -0.36924, 0.11211, -1.826997, 1.655345, -1.62082, -0.05911, 0.57729,
            0.58593, 1.69386,
        ];
        let (weights, data) = fixture(&outcomes);
        let strategy = QuantilePredictionStrategy::new(vec![0.5, 0.75, 0.80, 0.90]);
        let predictions = strategy.predict(42, &weights, &data, &data);
        assert_eq!(predictions.len(), 4);
        assert!(predictions.iter().all(|p| (-2.0..2.0).contains(p)));
    }

    #[test]
    fn repeated_quantiles_repeat_the_prediction() {
        let (weights, data) = fixture(&OUTCOMES);
        let predict = |quantiles: Vec<f64>| {
            QuantilePredictionStrategy::new(quantiles).predict(42, &weights, &data, &data)
        };
        let single = predict(vec![0.5]);
        let several = predict(vec![0.25, 0.5, 0.75]);
        let repeated = predict(vec![0.5, 0.5, 0.5]);
        assert_eq!(single[0], several[1]);
        assert!(repeated.iter().all(|&p| p == single[0]));
    }

    #[test]
    fn quantile_above_total_weight_takes_the_largest_outcome() {
        let (weights, data) = fixture(&OUTCOMES);
        let strategy = QuantilePredictionStrategy::new(vec![1.0]);
        let predictions = strategy.predict(0, &weights, &data, &data);
        assert_eq!(predictions, vec![8.69386]);
    }
}
