use linfa_linalg::cholesky::{Cholesky, SolveC};
use ndarray::{Array1, Array2};

use super::RelabelingStrategy;
use crate::data::Data;

/// Vector treatment effect residuals from a centered least-squares fit.
///
/// Produces one response per `(outcome, treatment)` pair, at column
/// `outcome * num_treatments + treatment`, scaled by the matching gradient
/// weight.
#[derive(Debug, Clone)]
pub struct MultiCausalRelabelingStrategy {
    num_treatments: usize,
    num_outcomes: usize,
    gradient_weights: Vec<f64>,
}

impl MultiCausalRelabelingStrategy {
    /// An empty `gradient_weights` means all weights are 1. Otherwise it must
    /// have `num_outcomes * num_treatments` entries (checked by the trainer
    /// factory).
    #[must_use]
    pub fn new(num_treatments: usize, num_outcomes: usize, gradient_weights: Vec<f64>) -> Self {
        let response_length = num_treatments * num_outcomes;
        let gradient_weights = if gradient_weights.is_empty() {
            vec![1.0; response_length]
        } else {
            gradient_weights
        };
        Self {
            num_treatments,
            num_outcomes,
            gradient_weights,
        }
    }
}

impl RelabelingStrategy for MultiCausalRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        let num_samples = samples.len();
        if num_samples <= self.num_treatments {
            return true;
        }

        let mut y_centered = Array2::<f64>::zeros((num_samples, self.num_outcomes));
        let mut w_centered = Array2::<f64>::zeros((num_samples, self.num_treatments));
        let mut weights = Array1::<f64>::zeros(num_samples);
        let mut y_mean = Array1::<f64>::zeros(self.num_outcomes);
        let mut w_mean = Array1::<f64>::zeros(self.num_treatments);
        let mut sum_weight = 0.0;

        for (i, &sample) in samples.iter().enumerate() {
            let weight = data.get_weight(sample);
            let outcomes = Array1::from(data.get_outcomes(sample));
            let treatments = Array1::from(data.get_treatments(sample));
            y_mean.scaled_add(weight, &outcomes);
            w_mean.scaled_add(weight, &treatments);
            y_centered.row_mut(i).assign(&outcomes);
            w_centered.row_mut(i).assign(&treatments);
            weights[i] = weight;
            sum_weight += weight;
        }
        if sum_weight.abs() <= 1e-16 {
            return true;
        }

        y_mean /= sum_weight;
        w_mean /= sum_weight;
        y_centered -= &y_mean;
        w_centered -= &w_mean;

        let weighted_w = &w_centered * &weights.view().insert_axis(ndarray::Axis(1));
        let ww_bar = weighted_w.t().dot(&w_centered);
        // det(ww_bar) is the squared product of the Cholesky diagonal
        let Ok(factor) = ww_bar.cholesky() else {
            return true;
        };
        let determinant = factor.diag().product().powi(2);
        if determinant <= 1.0e-10 {
            return true;
        }
        let mut ww_bar = ww_bar;
        let Ok(ww_inverse) = ww_bar.solvec(&Array2::eye(self.num_treatments)) else {
            return true;
        };

        let beta = ww_inverse.dot(&weighted_w.t().dot(&y_centered));
        let rho_weight = w_centered.dot(&ww_inverse.t());
        let residual = &y_centered - &w_centered.dot(&beta);

        for (i, &sample) in samples.iter().enumerate() {
            for outcome in 0..self.num_outcomes {
                for treatment in 0..self.num_treatments {
                    let j = outcome * self.num_treatments + treatment;
                    responses[[sample, j]] = rho_weight[[i, treatment]]
                        * residual[[i, outcome]]
                        * self.gradient_weights[j];
                }
            }
        }
        false
    }

    fn response_length(&self) -> usize {
        self.num_treatments * self.num_outcomes
    }
}
