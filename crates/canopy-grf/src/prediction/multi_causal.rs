use linfa_linalg::cholesky::SolveC;
use ndarray::{Array1, Array2, ArrayView1};

use super::debiaser::jackknife_leaf_values;
use super::{OptimizedPredictionStrategy, PredictionValues, weighted_leaf_sums};
use crate::data::Data;

/// Vector-valued treatment effects from leaf-averaged moments.
///
/// Leaf layout: `[w, Y (M), W (K), YW (K x M, row-major), WW (K x K)]` for
/// `K` treatments and `M` outcomes. The estimate solves
/// `(WW*w - W W') theta = YW*w - W Y'` and is reported outcome-major: entry
/// `outcome * K + treatment`.
#[derive(Debug, Clone, Copy)]
pub struct MultiCausalPredictionStrategy {
    num_treatments: usize,
    num_outcomes: usize,
}

/// One vector of statistics unpacked into its blocks.
struct Moments {
    weight: f64,
    y: Array1<f64>,
    w: Array1<f64>,
    yw: Array2<f64>,
    ww: Array2<f64>,
}

impl MultiCausalPredictionStrategy {
    #[must_use]
    pub fn new(num_treatments: usize, num_outcomes: usize) -> Self {
        Self {
            num_treatments,
            num_outcomes,
        }
    }

    fn y_index(&self) -> usize {
        1
    }

    fn w_index(&self) -> usize {
        self.y_index() + self.num_outcomes
    }

    fn yw_index(&self) -> usize {
        self.w_index() + self.num_treatments
    }

    fn ww_index(&self) -> usize {
        self.yw_index() + self.num_treatments * self.num_outcomes
    }

    fn unpack(&self, values: &[f64]) -> Moments {
        let (k, m) = (self.num_treatments, self.num_outcomes);
        let block = |start: usize, len: usize| Array1::from(values[start..start + len].to_vec());
        Moments {
            weight: values[0],
            y: block(self.y_index(), m),
            w: block(self.w_index(), k),
            yw: Array2::from_shape_fn((k, m), |(t, o)| values[self.yw_index() + t * m + o]),
            ww: Array2::from_shape_fn((k, k), |(s, t)| values[self.ww_index() + s * k + t]),
        }
    }

    /// Effects as a `K x M` matrix, `None` when the system is singular.
    fn solve_effects(&self, moments: &Moments) -> Option<Array2<f64>> {
        let w_col = moments.w.view().insert_axis(ndarray::Axis(1));
        let lhs = &moments.ww * moments.weight - w_col.dot(&w_col.t());
        let y_row = moments.y.view().insert_axis(ndarray::Axis(0));
        let rhs = &moments.yw * moments.weight - w_col.dot(&y_row);
        solve_symmetric(lhs, &rhs)
    }

    fn nan_prediction(&self) -> Vec<f64> {
        vec![f64::NAN; self.prediction_length()]
    }
}

/// Solve a symmetric positive-definite system, `None` when it is singular.
fn solve_symmetric(mut lhs: Array2<f64>, rhs: &Array2<f64>) -> Option<Array2<f64>> {
    let solution = lhs.solvec(rhs).ok()?;
    solution.iter().all(|v| v.is_finite()).then_some(solution)
}

fn invert_symmetric(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    solve_symmetric(matrix.clone(), &Array2::eye(matrix.nrows()))
}

fn outer(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
}

impl OptimizedPredictionStrategy for MultiCausalPredictionStrategy {
    fn prediction_length(&self) -> usize {
        self.num_treatments * self.num_outcomes
    }

    fn predict(&self, average: &[f64]) -> Vec<f64> {
        let moments = self.unpack(average);
        let Some(theta) = self.solve_effects(&moments) else {
            return self.nan_prediction();
        };
        (0..self.num_outcomes)
            .flat_map(|o| (0..self.num_treatments).map(move |t| (t, o)))
            .map(|(t, o)| theta[[t, o]])
            .collect()
    }

    /// Only a single outcome is supported; other shapes report NaN.
    fn compute_variance(
        &self,
        average: &[f64],
        leaf_values: &PredictionValues,
        ci_group_size: usize,
    ) -> Vec<f64> {
        if self.num_outcomes != 1 {
            return self.nan_prediction();
        }
        let moments = self.unpack(average);
        let (Some(theta), Some(ww_inverse)) =
            (self.solve_effects(&moments), invert_symmetric(&moments.ww))
        else {
            return self.nan_prediction();
        };
        let theta = theta.column(0).to_owned();
        let main_effect = (moments.y[0] - theta.dot(&moments.w)) / moments.weight;

        let ww_inverse_w = ww_inverse.dot(&moments.w);
        let k = moments.weight - moments.w.dot(&ww_inverse_w);
        let term1 = &ww_inverse + &(outer(ww_inverse_w.view(), ww_inverse_w.view()) / k);
        let term2 = &ww_inverse_w / k;

        jackknife_leaf_values(leaf_values, ci_group_size, self.num_treatments, |leaf| {
            let leaf = self.unpack(leaf);
            let psi_1 = leaf.yw.column(0).to_owned()
                - leaf.ww.dot(&theta)
                - &leaf.w * main_effect;
            let psi_2 = leaf.y[0] - leaf.w.dot(&theta) - leaf.weight * main_effect;
            (term1.dot(&psi_1) - &term2 * psi_2).to_vec()
        })
    }

    fn prediction_value_length(&self) -> usize {
        let (k, m) = (self.num_treatments, self.num_outcomes);
        k * (k + m + 1) + m + 1
    }

    fn precompute_prediction_values(
        &self,
        leaf_samples: &[&[usize]],
        data: &Data,
    ) -> PredictionValues {
        let (k, m) = (self.num_treatments, self.num_outcomes);
        let width = self.prediction_value_length();
        let values = leaf_samples
            .iter()
            .map(|leaf| {
                weighted_leaf_sums(leaf, data, width, |sample, weight, sums| {
                    let outcomes = data.get_outcomes(sample);
                    let treatments = data.get_treatments(sample);
                    for (o, y) in outcomes.iter().enumerate() {
                        sums[self.y_index() + o] += weight * y;
                    }
                    for (t, w) in treatments.iter().enumerate() {
                        sums[self.w_index() + t] += weight * w;
                        for (o, y) in outcomes.iter().enumerate() {
                            sums[self.yw_index() + t * m + o] += weight * w * y;
                        }
                        for (s, other) in treatments.iter().enumerate() {
                            sums[self.ww_index() + t * k + s] += weight * w * other;
                        }
                    }
                })
                .map_or_else(Vec::new, |(mut sums, weight_sum)| {
                    sums[0] = weight_sum;
                    let size = leaf.len() as f64;
                    sums.iter().map(|sum| sum / size).collect()
                })
            })
            .collect();
        PredictionValues::new(values, width)
    }

    fn compute_error(
        &self,
        _sample: usize,
        _average: &[f64],
        _leaf_values: &PredictionValues,
        _data: &Data,
    ) -> Vec<(f64, f64)> {
        vec![(f64::NAN, f64::NAN)]
    }
}
