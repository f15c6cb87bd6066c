//! Local linear corrections on top of forest weights.
//!
//! Both strategies fit a weighted ridge regression around the test point,
//! using the forest weights as kernel weights and the differences
//! `x_train - x_test` of the correction variables as regressors. The
//! intercept (and for [`LLCausalPredictionStrategy`] the treatment
//! coefficient) is left unpenalized.

use std::collections::BTreeMap;

use linfa_linalg::cholesky::SolveC;
use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::DefaultPredictionStrategy;
use super::debiaser::GroupedJackknife;
use crate::data::Data;

/// Solve the penalized normal equations through their Cholesky factor.
///
/// `None` when the system is not positive definite.
fn solve_penalized(penalized: &Array2<f64>, rhs: &Array1<f64>) -> Option<Array1<f64>> {
    let mut gram = penalized.clone();
    let rhs = rhs.clone().insert_axis(Axis(1));
    let theta = gram.solvec(&rhs).ok()?;
    theta
        .iter()
        .all(|v| v.is_finite())
        .then(|| theta.column(0).to_owned())
}

/// Weighted design around one test point.
struct LocalDesign {
    indices: Vec<usize>,
    x: Array2<f64>,
    y: Array1<f64>,
    weights: Array1<f64>,
}

impl LocalDesign {
    /// Build the design; `fill_row(train_row, out)` writes one regressor row.
    fn new<F>(
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        width: usize,
        fill_row: F,
    ) -> Self
    where
        F: Fn(usize, &mut [f64]),
    {
        let n = weights_by_sample.len();
        let indices: Vec<usize> = weights_by_sample.keys().copied().collect();
        let weights: Array1<f64> = weights_by_sample.values().copied().collect();
        let mut x = Array2::zeros((n, width));
        let mut row_buffer = vec![0.0; width];
        for (i, &index) in indices.iter().enumerate() {
            row_buffer.fill(0.0);
            fill_row(index, &mut row_buffer);
            x.row_mut(i).assign(&ArrayView1::from(row_buffer.as_slice()));
        }
        let y = indices.iter().map(|&index| train_data.get_outcome(index)).collect();
        Self {
            indices,
            x,
            y,
            weights,
        }
    }

    /// `X' diag(w) X`.
    fn gram(&self) -> Array2<f64> {
        let weighted = &self.x * &self.weights.view().insert_axis(Axis(1));
        weighted.t().dot(&self.x)
    }

    /// `X' diag(w) Y`.
    fn moment(&self) -> Array1<f64> {
        (&self.x.t() * &self.weights).dot(&self.y)
    }

    /// Ridge-penalize the diagonal, except for the `unpenalized` entries.
    fn penalize(
        gram: &Array2<f64>,
        lambda: f64,
        weight_penalty: bool,
        unpenalized: &[usize],
    ) -> Array2<f64> {
        let dim = gram.nrows();
        let normalization = gram.diag().sum() / dim as f64;
        let mut penalized = gram.clone();
        for j in (0..dim).filter(|j| !unpenalized.contains(j)) {
            penalized[[j, j]] += if weight_penalty {
                lambda * gram[[j, j]]
            } else {
                lambda * normalization
            };
        }
        penalized
    }

    /// Ridge coefficient `coefficient` for every lambda (NaN when singular).
    fn coefficients(
        &self,
        lambdas: &[f64],
        weight_penalty: bool,
        unpenalized: &[usize],
        coefficient: usize,
    ) -> Vec<f64> {
        let gram = self.gram();
        let moment = self.moment();
        lambdas
            .iter()
            .map(|&lambda| {
                let penalized = Self::penalize(&gram, lambda, weight_penalty, unpenalized);
                solve_penalized(&penalized, &moment).map_or(f64::NAN, |theta| theta[coefficient])
            })
            .collect()
    }

    /// Grouped jackknife of the influence of coefficient `coefficient`.
    fn variance(
        &self,
        lambdas: &[f64],
        weight_penalty: bool,
        unpenalized: &[usize],
        coefficient: usize,
        samples_by_tree: &[&[usize]],
        ci_group_size: usize,
    ) -> Vec<f64> {
        let gram = self.gram();
        let moment = self.moment();
        let position: BTreeMap<usize, usize> = self
            .indices
            .iter()
            .enumerate()
            .map(|(i, &index)| (index, i))
            .collect();
        let mut unit = Array1::zeros(gram.nrows());
        unit[coefficient] = 1.0;

        lambdas
            .iter()
            .map(|&lambda| {
                let penalized = Self::penalize(&gram, lambda, weight_penalty, unpenalized);
                let (Some(theta), Some(zeta)) = (
                    solve_penalized(&penalized, &moment),
                    solve_penalized(&penalized, &unit),
                ) else {
                    return f64::NAN;
                };
                let residuals = &self.y - &self.x.dot(&theta);
                let pseudo_residuals = self.x.dot(&zeta) * residuals;
                self.jackknife(&pseudo_residuals, &position, samples_by_tree, ci_group_size)
            })
            .collect()
    }

    fn jackknife(
        &self,
        pseudo_residuals: &Array1<f64>,
        position: &BTreeMap<usize, usize>,
        samples_by_tree: &[&[usize]],
        ci_group_size: usize,
    ) -> f64 {
        let mut jackknife = GroupedJackknife::new(1, ci_group_size);
        if ci_group_size == 0 {
            return jackknife.finish(true)[0];
        }
        for group in samples_by_tree.chunks_exact(ci_group_size) {
            if group.iter().any(|samples| samples.is_empty()) {
                continue;
            }
            let psis: Vec<[f64; 1]> = group
                .iter()
                .map(|samples| {
                    let total: f64 = samples
                        .iter()
                        .filter_map(|sample| position.get(sample))
                        .map(|&i| pseudo_residuals[i])
                        .sum();
                    [total / samples.len() as f64]
                })
                .collect();
            jackknife.add_group(psis.iter().map(|psi| psi.as_slice()));
        }
        jackknife.finish(true)[0]
    }
}

/// Local linear regression forest prediction.
///
/// One prediction per lambda; the variance is reported per lambda too.
#[derive(Debug, Clone)]
pub struct LocalLinearPredictionStrategy {
    lambdas: Vec<f64>,
    weight_penalty: bool,
    linear_correction_variables: Vec<usize>,
}

impl LocalLinearPredictionStrategy {
    #[must_use]
    pub fn new(
        lambdas: Vec<f64>,
        weight_penalty: bool,
        linear_correction_variables: Vec<usize>,
    ) -> Self {
        Self {
            lambdas,
            weight_penalty,
            linear_correction_variables,
        }
    }

    fn design(
        &self,
        sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
    ) -> LocalDesign {
        let width = self.linear_correction_variables.len() + 1;
        LocalDesign::new(weights_by_sample, train_data, width, |index, row| {
            row[0] = 1.0;
            for (j, &var) in self.linear_correction_variables.iter().enumerate() {
                row[j + 1] = train_data.get(index, var) - data.get(sample, var);
            }
        })
    }
}

impl DefaultPredictionStrategy for LocalLinearPredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.lambdas.len()
    }

    fn predict(
        &self,
        sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
    ) -> Vec<f64> {
        self.design(sample, weights_by_sample, train_data, data)
            .coefficients(&self.lambdas, self.weight_penalty, &[0], 0)
    }

    fn compute_variance(
        &self,
        sample: usize,
        samples_by_tree: &[&[usize]],
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
        ci_group_size: usize,
    ) -> Vec<f64> {
        self.design(sample, weights_by_sample, train_data, data).variance(
            &self.lambdas,
            self.weight_penalty,
            &[0],
            0,
            samples_by_tree,
            ci_group_size,
        )
    }
}

/// Local linear treatment effect: the coefficient on the treatment in a
/// ridge fit with treatment interactions.
///
/// Regressors: intercept, `dx_1..dx_p`, treatment, `dx_1 W..dx_p W`.
#[derive(Debug, Clone)]
pub struct LLCausalPredictionStrategy {
    lambdas: Vec<f64>,
    weight_penalty: bool,
    linear_correction_variables: Vec<usize>,
}

impl LLCausalPredictionStrategy {
    #[must_use]
    pub fn new(
        lambdas: Vec<f64>,
        weight_penalty: bool,
        linear_correction_variables: Vec<usize>,
    ) -> Self {
        Self {
            lambdas,
            weight_penalty,
            linear_correction_variables,
        }
    }

    fn treatment_index(&self) -> usize {
        self.linear_correction_variables.len() + 1
    }

    fn design(
        &self,
        sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
    ) -> LocalDesign {
        let treatment_index = self.treatment_index();
        let width = 2 * treatment_index;
        LocalDesign::new(weights_by_sample, train_data, width, |index, row| {
            let treatment = train_data.get_treatment(index);
            row[0] = 1.0;
            row[treatment_index] = treatment;
            for (j, &var) in self.linear_correction_variables.iter().enumerate() {
                let delta = train_data.get(index, var) - data.get(sample, var);
                row[j + 1] = delta;
                row[treatment_index + j + 1] = delta * treatment;
            }
        })
    }
}

impl DefaultPredictionStrategy for LLCausalPredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.lambdas.len()
    }

    fn predict(
        &self,
        sample: usize,
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
    ) -> Vec<f64> {
        let treatment_index = self.treatment_index();
        self.design(sample, weights_by_sample, train_data, data).coefficients(
            &self.lambdas,
            self.weight_penalty,
            &[0, treatment_index],
            treatment_index,
        )
    }

    fn compute_variance(
        &self,
        sample: usize,
        samples_by_tree: &[&[usize]],
        weights_by_sample: &BTreeMap<usize, f64>,
        train_data: &Data,
        data: &Data,
        ci_group_size: usize,
    ) -> Vec<f64> {
        let treatment_index = self.treatment_index();
        self.design(sample, weights_by_sample, train_data, data).variance(
            &self.lambdas,
            self.weight_penalty,
            &[0, treatment_index],
            treatment_index,
            samples_by_tree,
            ci_group_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn uniform_weights(n: usize) -> BTreeMap<usize, f64> {
        (0..n).map(|i| (i, 1.0 / n as f64)).collect()
    }

    #[test]
    fn unpenalized_fit_extrapolates_a_line() {
        // y = 2x + 1, predicted at x = 10 from training points 0..5
        let train_rows: Vec<Vec<f64>> = (0..5)
            .map(|i| vec![f64::from(i), 2.0 * f64::from(i) + 1.0])
            .collect();
        let train = Data::from_rows(&train_rows).unwrap().with_outcome_index(1).unwrap();
        let test = Data::from_rows(&[vec![10.0, 0.0]]).unwrap();
        let strategy = LocalLinearPredictionStrategy::new(vec![0.0], false, vec![0]);
        let prediction = strategy.predict(0, &uniform_weights(5), &train, &test);
        assert_abs_diff_eq!(prediction[0], 21.0, epsilon = 1e-9);
    }

    #[test]
    fn singular_local_design_predicts_nan() {
        // every training point sits at the test point, so the slope is unidentified
        let train_rows: Vec<Vec<f64>> = (0..5).map(|i| vec![3.0, f64::from(i)]).collect();
        let train = Data::from_rows(&train_rows).unwrap().with_outcome_index(1).unwrap();
        let test = Data::from_rows(&[vec![3.0, 0.0]]).unwrap();
        let strategy = LocalLinearPredictionStrategy::new(vec![0.0], false, vec![0]);
        let prediction = strategy.predict(0, &uniform_weights(5), &train, &test);
        assert!(prediction[0].is_nan());
    }

    #[test]
    fn heavy_penalty_shrinks_toward_the_weighted_mean() {
        let train_rows: Vec<Vec<f64>> = (0..5)
            .map(|i| vec![f64::from(i), 2.0 * f64::from(i) + 1.0])
            .collect();
        let train = Data::from_rows(&train_rows).unwrap().with_outcome_index(1).unwrap();
        let test = Data::from_rows(&[vec![10.0, 0.0]]).unwrap();
        let strategy = LocalLinearPredictionStrategy::new(vec![0.0, 1e9], false, vec![0]);
        let predictions = strategy.predict(0, &uniform_weights(5), &train, &test);
        assert_eq!(predictions.len(), 2);
        // mean outcome is 5
        assert_abs_diff_eq!(predictions[1], 5.0, epsilon = 1e-3);
        assert!(predictions[1] < predictions[0]);
    }

    #[test]
    fn causal_fit_recovers_the_treatment_effect() {
        // y = 1 + 0.5 x + 3 w with binary w
        let train_rows: Vec<Vec<f64>> = (0..8)
            .map(|i| {
                let x = f64::from(i / 2);
                let w = f64::from(i % 2);
                vec![x, w, 1.0 + 0.5 * x + 3.0 * w]
            })
            .collect();
        let train = Data::from_rows(&train_rows)
            .unwrap()
            .with_treatment_index(1)
            .unwrap()
            .with_outcome_index(2)
            .unwrap();
        let test = Data::from_rows(&[vec![1.5, 0.0, 0.0]]).unwrap();
        let strategy = LLCausalPredictionStrategy::new(vec![0.0], false, vec![0]);
        let effect = strategy.predict(0, &uniform_weights(8), &train, &test);
        assert_abs_diff_eq!(effect[0], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn variance_is_reported_per_lambda() {
        let train_rows: Vec<Vec<f64>> = (0..8)
            .map(|i| {
                let x = f64::from(i);
                let wiggle = if i % 3 == 0 { 0.7 } else { -0.4 };
                vec![x, x + wiggle]
            })
            .collect();
        let train = Data::from_rows(&train_rows).unwrap().with_outcome_index(1).unwrap();
        let test = Data::from_rows(&[vec![3.5, 0.0]]).unwrap();
        let strategy = LocalLinearPredictionStrategy::new(vec![0.1, 1.0], false, vec![0]);
        let leaves: [&[usize]; 4] = [&[0, 1, 2], &[3, 4], &[5, 6, 7], &[1, 4, 6]];
        let variance =
            strategy.compute_variance(0, &leaves, &uniform_weights(8), &train, &test, 2);
        assert_eq!(variance.len(), 2);
        assert!(variance.iter().all(|v| *v >= 0.0));
    }
}
