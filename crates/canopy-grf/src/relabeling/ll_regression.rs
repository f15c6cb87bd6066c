use linfa_linalg::cholesky::SolveC;
use ndarray::{Array1, Array2, Axis};

use super::RelabelingStrategy;
use crate::data::Data;

/// Residuals of a node-local ridge regression on selected covariates.
///
/// Nodes smaller than `split_cutoff` reuse `overall_beta` (intercept first)
/// instead of fitting their own coefficients.
#[derive(Debug, Clone)]
pub struct LLRegressionRelabelingStrategy {
    split_lambda: f64,
    weight_penalty: bool,
    overall_beta: Vec<f64>,
    split_cutoff: usize,
    split_variables: Vec<usize>,
}

impl LLRegressionRelabelingStrategy {
    #[must_use]
    pub fn new(
        split_lambda: f64,
        weight_penalty: bool,
        overall_beta: Vec<f64>,
        split_cutoff: usize,
        split_variables: Vec<usize>,
    ) -> Self {
        Self {
            split_lambda,
            weight_penalty,
            overall_beta,
            split_cutoff,
            split_variables,
        }
    }
}

impl RelabelingStrategy for LLRegressionRelabelingStrategy {
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool {
        let num_variables = self.split_variables.len();
        let num_points = samples.len();

        let mut x = Array2::<f64>::ones((num_points, num_variables + 1));
        let mut y = Array1::<f64>::zeros(num_points);
        for (i, &sample) in samples.iter().enumerate() {
            for (j, &var) in self.split_variables.iter().enumerate() {
                x[[i, j + 1]] = data.get(sample, var);
            }
            y[i] = data.get_outcome(sample);
        }

        let leaf_predictions = if num_points < self.split_cutoff {
            if self.overall_beta.len() != num_variables + 1 {
                return true;
            }
            x.dot(&Array1::from(self.overall_beta.clone()))
        } else {
            let mut m = x.t().dot(&x);
            if self.weight_penalty {
                for j in 1..=num_variables {
                    m[[j, j]] += self.split_lambda * m[[j, j]];
                }
            } else {
                let normalization = m.diag().sum() / (num_variables + 1) as f64;
                for j in 1..=num_variables {
                    m[[j, j]] += self.split_lambda * normalization;
                }
            }
            let rhs = x.t().dot(&y).insert_axis(Axis(1));
            let Ok(coefficients) = m.solvec(&rhs) else {
                return true;
            };
            if coefficients.iter().any(|c| !c.is_finite()) {
                return true;
            }
            x.dot(&coefficients.column(0))
        };

        for (i, &sample) in samples.iter().enumerate() {
            responses[[sample, 0]] = leaf_predictions[i] - y[i];
        }
        false
    }
}
