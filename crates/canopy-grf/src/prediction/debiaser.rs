use statrs::function::erf::erfc;

use crate::utility::equal_doubles;

/// Objective Bayes correction of a grouped jackknife variance.
///
/// With `S` the true between-group variance, `var_between - group_noise` is
/// treated as a Gaussian estimate of `S` with standard error
/// `max(var_between, group_noise) * sqrt(2 / num_good_groups)`. Under a flat
/// prior on `[0, inf)` the posterior mean is the initial estimate plus
/// `se * phi(r) / Phi(r)` where `r = estimate / se`. Large positive estimates
/// pass through almost untouched; the result is never negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectiveBayesDebiaser;

impl ObjectiveBayesDebiaser {
    /// Debias one variance component.
    #[must_use]
    pub fn debias(&self, var_between: f64, group_noise: f64, num_good_groups: usize) -> f64 {
        let initial_estimate = var_between - group_noise;
        let initial_se =
            var_between.max(group_noise) * (2.0 / num_good_groups as f64).sqrt();
        if equal_doubles(initial_se, 0.0, 1.0e-10) {
            return 0.0;
        }

        let ratio = initial_estimate / initial_se;
        let density = (-ratio * ratio / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt();
        let tail = 0.5 * erfc(-ratio / std::f64::consts::SQRT_2);
        initial_estimate + initial_se * density / tail
    }
}

/// Running sums of the grouped half-sample jackknife.
///
/// Feed each complete CI group through [`add_group`](Self::add_group); empty
/// members make a group unusable and it should be skipped by the caller.
pub(crate) struct GroupedJackknife {
    ci_group_size: usize,
    num_good_groups: usize,
    psi_squared: Vec<f64>,
    psi_grouped_squared: Vec<f64>,
    avg_score: Vec<f64>,
    group_psi: Vec<f64>,
}

impl GroupedJackknife {
    pub(crate) fn new(dim: usize, ci_group_size: usize) -> Self {
        Self {
            ci_group_size,
            num_good_groups: 0,
            psi_squared: vec![0.0; dim],
            psi_grouped_squared: vec![0.0; dim],
            avg_score: vec![0.0; dim],
            group_psi: vec![0.0; dim],
        }
    }

    /// Add one good group given the pseudo-values of its members.
    pub(crate) fn add_group<'a, I>(&mut self, members: I)
    where
        I: IntoIterator<Item = &'a [f64]>,
    {
        self.num_good_groups += 1;
        self.group_psi.fill(0.0);
        for psi in members {
            for (d, &value) in psi.iter().enumerate() {
                self.psi_squared[d] += value * value;
                self.group_psi[d] += value;
            }
        }
        let size = self.ci_group_size as f64;
        for d in 0..self.group_psi.len() {
            let group_mean = self.group_psi[d] / size;
            self.psi_grouped_squared[d] += group_mean * group_mean;
            self.avg_score[d] += group_mean;
        }
    }

    /// Debiased variance per dimension; NaN when no group was usable.
    ///
    /// With `centered` the mean pseudo-value is removed from both sums, for
    /// scores that are not zero-mean by construction.
    pub(crate) fn finish(&self, centered: bool) -> Vec<f64> {
        if self.num_good_groups == 0 {
            return vec![f64::NAN; self.psi_squared.len()];
        }
        let groups = self.num_good_groups as f64;
        let size = self.ci_group_size as f64;
        let debiaser = ObjectiveBayesDebiaser;
        (0..self.psi_squared.len())
            .map(|d| {
                let shift = if centered {
                    let mean = self.avg_score[d] / groups;
                    mean * mean
                } else {
                    0.0
                };
                let var_between = self.psi_grouped_squared[d] / groups - shift;
                let var_total = self.psi_squared[d] / (groups * size) - shift;
                let group_noise = (var_total - var_between) / (size - 1.0);
                debiaser.debias(var_between, group_noise, self.num_good_groups)
            })
            .collect()
    }
}

/// Run the jackknife over the per-tree leaf values of one test sample.
///
/// `psi` maps a non-empty leaf to its pseudo-value of length `dim`.
pub(crate) fn jackknife_leaf_values<F>(
    leaf_values: &super::PredictionValues,
    ci_group_size: usize,
    dim: usize,
    mut psi: F,
) -> Vec<f64>
where
    F: FnMut(&[f64]) -> Vec<f64>,
{
    let mut jackknife = GroupedJackknife::new(dim, ci_group_size);
    if ci_group_size == 0 {
        return jackknife.finish(false);
    }
    for group in 0..leaf_values.num_nodes() / ci_group_size {
        let first = group * ci_group_size;
        let members = first..first + ci_group_size;
        if members.clone().any(|node| leaf_values.empty(node)) {
            continue;
        }
        let pseudo_values: Vec<Vec<f64>> = members
            .map(|node| psi(leaf_values.get_values(node)))
            .collect();
        jackknife.add_group(pseudo_values.iter().map(Vec::as_slice));
    }
    jackknife.finish(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_spread_debiases_to_zero() {
        assert_eq!(ObjectiveBayesDebiaser.debias(0.0, 0.0, 10), 0.0);
    }

    #[test]
    fn never_negative_when_noise_dominates() {
        let debiased = ObjectiveBayesDebiaser.debias(1.0, 5.0, 4);
        assert!(debiased > 0.0);
        assert!(debiased < 5.0);
    }

    #[test]
    fn large_clear_estimates_pass_through() {
        let debiased = ObjectiveBayesDebiaser.debias(100.0, 1.0, 10_000);
        approx::assert_relative_eq!(debiased, 99.0, epsilon = 1e-6);
    }

    #[test]
    fn debias_is_scale_covariant() {
        let base = ObjectiveBayesDebiaser.debias(0.8, 1.3, 6);
        let scaled = ObjectiveBayesDebiaser.debias(0.8 * 9.0, 1.3 * 9.0, 6);
        approx::assert_relative_eq!(scaled, base * 9.0, epsilon = 1e-10);
    }

    #[test]
    fn groups_with_an_empty_member_are_skipped() {
        let values = super::super::PredictionValues::new(
            vec![vec![1.0], vec![], vec![2.0], vec![4.0]],
            1,
        );
        let mut seen = 0;
        let variance = jackknife_leaf_values(&values, 2, 1, |leaf| {
            seen += 1;
            vec![leaf[0]]
        });
        assert_eq!(seen, 2);
        assert!(variance[0] >= 0.0);
    }

    #[test]
    fn no_good_group_gives_nan() {
        let values = super::super::PredictionValues::new(vec![vec![1.0], vec![]], 1);
        let variance = jackknife_leaf_values(&values, 2, 1, |leaf| vec![leaf[0]]);
        assert!(variance[0].is_nan());
    }
}
