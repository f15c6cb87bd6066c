use std::collections::BTreeMap;

use super::DefaultPredictionStrategy;
use crate::data::Data;

/// Which survival curve estimator to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SurvivalPredictionKind {
    /// Product-limit estimate.
    #[default]
    KaplanMeier,
    /// `exp(-H)` with the Nelson-Aalen cumulative hazard `H`.
    NelsonAalen,
}

/// Forest-weighted survival curve on a fixed grid of failure times.
///
/// Training outcomes are mapped to grid indices: index `k` covers times in
/// `[t_k, t_{k+1})`, index 0 everything before the first failure time. The
/// prediction has one survival probability per grid point.
#[derive(Debug, Clone)]
pub struct SurvivalPredictionStrategy {
    failure_times: Vec<f64>,
    kind: SurvivalPredictionKind,
}

impl SurvivalPredictionStrategy {
    /// `failure_times` must be sorted ascending and free of duplicates.
    #[must_use]
    pub fn new(failure_times: Vec<f64>, kind: SurvivalPredictionKind) -> Self {
        Self {
            failure_times,
            kind,
        }
    }

    /// Use the distinct failure times of `train_data` as the grid.
    #[must_use]
    pub fn from_training_data(train_data: &Data, kind: SurvivalPredictionKind) -> Self {
        let mut failure_times: Vec<f64> = (0..train_data.num_rows())
            .filter(|&row| train_data.is_failure(row))
            .map(|row| train_data.get_outcome(row))
            .collect();
        failure_times.sort_by(f64::total_cmp);
        failure_times.dedup();
        Self::new(failure_times, kind)
    }

    /// Return the grid of failure times.
    #[must_use]
    pub fn failure_times(&self) -> &[f64] {
        &self.failure_times
    }

    fn kaplan_meier(&self, count_failure: &[f64], count_censor: &[f64], total: f64) -> Vec<f64> {
        let mut at_risk = total - count_censor[0];
        let mut survival = 1.0;
        (1..=self.failure_times.len())
            .map(|time| {
                if at_risk > 0.0 {
                    survival *= 1.0 - count_failure[time] / at_risk;
                }
                at_risk -= count_failure[time] + count_censor[time];
                survival
            })
            .collect()
    }

    fn nelson_aalen(&self, count_failure: &[f64], count_censor: &[f64], total: f64) -> Vec<f64> {
        let mut at_risk = total - count_censor[0];
        let mut hazard = 0.0;
        (1..=self.failure_times.len())
            .map(|time| {
                if at_risk > 0.0 {
                    hazard += count_failure[time] / at_risk;
                }
                at_risk -= count_failure[time] + count_censor[time];
                (-hazard).exp()
            })
            .collect()
    }
}

impl DefaultPredictionStrategy for SurvivalPredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.failure_times.len()
    }

    fn predict(
        &self,
        _sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        _data: &Data,
    ) -> Vec<f64> {
        let num_failures = self.failure_times.len();
        let mut count_failure = vec![0.0; num_failures + 1];
        let mut count_censor = vec![0.0; num_failures + 1];
        let mut total = 0.0;
        for (&sample, &forest_weight) in weights_by_sample {
            let time = train_data.get_outcome(sample);
            let index = self.failure_times.partition_point(|&t| t <= time);
            let weight = forest_weight * train_data.get_weight(sample);
            if train_data.is_failure(sample) {
                count_failure[index] += weight;
            } else {
                count_censor[index] += weight;
            }
            total += weight;
        }

        match self.kind {
            SurvivalPredictionKind::KaplanMeier => {
                self.kaplan_meier(&count_failure, &count_censor, total)
            }
            SurvivalPredictionKind::NelsonAalen => {
                self.nelson_aalen(&count_failure, &count_censor, total)
            }
        }
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
        vec![f64::NAN; self.failure_times.len()]
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    /// Columns: time, event indicator.
    fn survival_data(rows: &[[f64; 2]]) -> Data {
        let rows: Vec<Vec<f64>> = rows.iter().map(|r| r.to_vec()).collect();
        Data::from_rows(&rows)
            .unwrap()
            .with_outcome_index(0)
            .unwrap()
            .with_censor_index(1)
            .unwrap()
    }

    fn uniform_weights(n: usize) -> BTreeMap<usize, f64> {
        (0..n).map(|i| (i, 1.0 / n as f64)).collect()
    }

    #[test]
    fn grid_uses_distinct_failure_times() {
        let data = survival_data(&[[3.0, 1.0], [1.0, 1.0], [2.0, 0.0], [3.0, 1.0]]);
        let strategy = SurvivalPredictionStrategy::from_training_data(
            &data,
            SurvivalPredictionKind::KaplanMeier,
        );
        assert_eq!(strategy.failure_times(), &[1.0, 3.0]);
    }

    #[test]
    fn kaplan_meier_without_censoring() {
        let data = survival_data(&[[1.0, 1.0], [2.0, 1.0], [3.0, 1.0], [4.0, 1.0]]);
        let strategy = SurvivalPredictionStrategy::from_training_data(
            &data,
            SurvivalPredictionKind::KaplanMeier,
        );
        let curve = strategy.predict(0, &uniform_weights(4), &data, &data);
        let expected = [0.75, 0.5, 0.25, 0.0];
        for (got, want) in curve.iter().zip(expected) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-12);
        }
    }

    #[test]
    fn kaplan_meier_with_censoring() {
        // the sample censored at 2 stays at risk for failures at 2
        let data = survival_data(&[[1.0, 1.0], [2.0, 0.0], [2.0, 1.0], [4.0, 1.0]]);
        let strategy = SurvivalPredictionStrategy::from_training_data(
            &data,
            SurvivalPredictionKind::KaplanMeier,
        );
        let curve = strategy.predict(0, &uniform_weights(4), &data, &data);
        assert_eq!(curve.len(), 3);
        assert_abs_diff_eq!(curve[0], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(curve[1], 0.75 * (1.0 - 1.0 / 3.0), epsilon = 1e-12);
        assert_abs_diff_eq!(curve[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn nelson_aalen_accumulates_hazard() {
        let data = survival_data(&[[1.0, 1.0], [2.0, 1.0], [3.0, 1.0], [4.0, 1.0]]);
        let strategy = SurvivalPredictionStrategy::from_training_data(
            &data,
            SurvivalPredictionKind::NelsonAalen,
        );
        let curve = strategy.predict(0, &uniform_weights(4), &data, &data);
        let hazards: [f64; 4] = [
            0.25,
            0.25 + 1.0 / 3.0,
            0.25 + 1.0 / 3.0 + 0.5,
            0.25 + 1.0 / 3.0 + 0.5 + 1.0,
        ];
        for (got, hazard) in curve.iter().zip(hazards) {
            assert_abs_diff_eq!(*got, (-hazard).exp(), epsilon = 1e-12);
        }
    }

    #[test]
    fn curve_is_non_increasing() {
        let data = survival_data(&[
            [5.0, 1.0],
            [1.0, 0.0],
            [3.0, 1.0],
            [2.0, 1.0],
            [8.0, 0.0],
            [6.0, 1.0],
        ]);
        let weights: BTreeMap<usize, f64> =
            [(0, 0.3), (1, 0.1), (2, 0.2), (3, 0.1), (4, 0.2), (5, 0.1)].into_iter().collect();
        for kind in [SurvivalPredictionKind::KaplanMeier, SurvivalPredictionKind::NelsonAalen] {
            let strategy = SurvivalPredictionStrategy::from_training_data(&data, kind);
            let curve = strategy.predict(0, &weights, &data, &data);
            assert!(curve.windows(2).all(|w| w[1] <= w[0]));
            assert!(curve.iter().all(|s| (0.0..=1.0).contains(s)));
        }
    }
}
