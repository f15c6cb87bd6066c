//! Seeded sampling of rows, clusters, honesty halves and split variables.

use std::collections::BTreeSet;

use rand::Rng;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};

/// Cluster assignment shared by every sampler of a training run.
///
/// Raw cluster labels are mapped to ids `0..K` in order of first appearance.
/// Without clusters every row is its own sampling unit.
#[derive(Debug, Clone, Default)]
pub struct SamplingOptions {
    samples_per_cluster: usize,
    clusters: Vec<Vec<usize>>,
}

impl SamplingOptions {
    /// Build options from one cluster label per row.
    ///
    /// `samples_per_cluster = None` keeps every member of a drawn cluster.
    #[must_use]
    pub fn new(samples_per_cluster: Option<usize>, cluster_labels: &[usize]) -> Self {
        let mut id_by_label = std::collections::HashMap::new();
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for (row, &label) in cluster_labels.iter().enumerate() {
            let id = *id_by_label.entry(label).or_insert_with(|| {
                clusters.push(Vec::new());
                clusters.len() - 1
            });
            clusters[id].push(row);
        }

        let largest = clusters.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            samples_per_cluster: samples_per_cluster.unwrap_or(largest),
            clusters,
        }
    }

    /// Return the member rows of each cluster id.
    #[must_use]
    pub fn clusters(&self) -> &[Vec<usize>] {
        &self.clusters
    }

    /// Return the per-cluster cap applied when expanding drawn clusters.
    #[must_use]
    pub fn samples_per_cluster(&self) -> usize {
        self.samples_per_cluster
    }
}

/// A deterministic sampler. One per tree, never shared across workers.
pub struct RandomSampler<'a> {
    rng: ChaCha8Rng,
    options: &'a SamplingOptions,
}

impl<'a> RandomSampler<'a> {
    /// Create a sampler seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64, options: &'a SamplingOptions) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            options,
        }
    }

    /// Draw `floor(num_samples * fraction)` distinct indices from `0..num_samples`.
    pub fn sample(&mut self, num_samples: usize, fraction: f64) -> Vec<usize> {
        let num_inbag = ((num_samples as f64) * fraction) as usize;
        rand::seq::index::sample(&mut self.rng, num_samples, num_inbag.min(num_samples)).into_vec()
    }

    /// Draw sampling units: rows without clusters, cluster ids with them.
    pub fn sample_clusters(&mut self, num_rows: usize, fraction: f64) -> Vec<usize> {
        if self.options.clusters.is_empty() {
            self.sample(num_rows, fraction)
        } else {
            self.sample(self.options.clusters.len(), fraction)
        }
    }

    /// Split `samples` into a `ceil(len * fraction)` in-bag part and the rest.
    pub fn subsample(&mut self, samples: &[usize], fraction: f64) -> (Vec<usize>, Vec<usize>) {
        let mut shuffled = samples.to_vec();
        shuffled.shuffle(&mut self.rng);
        let size = ((samples.len() as f64) * fraction).ceil() as usize;
        let held_out = shuffled.split_off(size.min(shuffled.len()));
        (shuffled, held_out)
    }

    /// Draw exactly `size` of `samples` (or all of them when fewer).
    pub fn subsample_with_size(&mut self, samples: &[usize], size: usize) -> Vec<usize> {
        let mut shuffled = samples.to_vec();
        shuffled.shuffle(&mut self.rng);
        shuffled.truncate(size);
        shuffled
    }

    /// Expand cluster ids to rows, capping each cluster at `samples_per_cluster`.
    pub fn sample_from_clusters(&mut self, clusters: &[usize]) -> Vec<usize> {
        if self.options.clusters.is_empty() {
            return clusters.to_vec();
        }
        let cap = self.options.samples_per_cluster;
        let mut samples = Vec::new();
        for &cluster in clusters {
            let members = &self.options.clusters[cluster];
            if members.len() <= cap {
                samples.extend_from_slice(members);
            } else {
                let drawn = self.subsample_with_size(members, cap);
                samples.extend(drawn);
            }
        }
        samples
    }

    /// Expand cluster ids to every member row, without any cap.
    #[must_use]
    pub fn get_samples_in_clusters(&self, clusters: &[usize]) -> Vec<usize> {
        if self.options.clusters.is_empty() {
            return clusters.to_vec();
        }
        clusters
            .iter()
            .flat_map(|&cluster| self.options.clusters[cluster].iter().copied())
            .collect()
    }

    /// Draw `num_samples` distinct values from `0..max` excluding `skip`.
    ///
    /// Rejection sampling is used when few values are needed, a partial
    /// Fisher-Yates shuffle otherwise.
    pub fn draw(&mut self, max: usize, skip: &BTreeSet<usize>, num_samples: usize) -> Vec<usize> {
        let num_skipped = skip.iter().filter(|&&s| s < max).count();
        let available = max.saturating_sub(num_skipped);
        let num_samples = num_samples.min(available);
        if num_samples == 0 {
            return Vec::new();
        }
        if (num_samples as f64) < (max as f64) / 10.0 {
            self.draw_simple(max, skip, num_samples, available)
        } else {
            self.draw_fisher_yates(max, skip, num_samples)
        }
    }

    fn draw_simple(
        &mut self,
        max: usize,
        skip: &BTreeSet<usize>,
        num_samples: usize,
        available: usize,
    ) -> Vec<usize> {
        let mut taken = vec![false; max];
        let mut result = Vec::with_capacity(num_samples);
        while result.len() < num_samples {
            let mut draw = self.rng.gen_range(0..available);
            for &skip_value in skip.range(..max) {
                if draw >= skip_value {
                    draw += 1;
                }
            }
            if !taken[draw] {
                taken[draw] = true;
                result.push(draw);
            }
        }
        result
    }

    fn draw_fisher_yates(
        &mut self,
        max: usize,
        skip: &BTreeSet<usize>,
        num_samples: usize,
    ) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..max).filter(|v| !skip.contains(v)).collect();
        let (drawn, _) = pool.partial_shuffle(&mut self.rng, num_samples);
        drawn.to_vec()
    }

    /// Draw from a Poisson distribution with the given mean; 0 for a
    /// non-positive mean.
    pub fn sample_poisson(&mut self, mean: usize) -> usize {
        match Poisson::new(mean as f64) {
            Ok(poisson) => {
                let draw: f64 = poisson.sample(&mut self.rng);
                draw as usize
            }
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_draws_floor_fraction() {
        let options = SamplingOptions::default();
        let mut sampler = RandomSampler::new(7, &options);
        let drawn = sampler.sample(11, 0.5);
        assert_eq!(drawn.len(), 5);
        let unique: BTreeSet<usize> = drawn.iter().copied().collect();
        assert_eq!(unique.len(), 5);
        assert!(drawn.iter().all(|&i| i < 11));
    }

    #[test]
    fn sampler_is_deterministic_for_a_seed() {
        let options = SamplingOptions::default();
        let a = RandomSampler::new(3, &options).sample(100, 0.3);
        let b = RandomSampler::new(3, &options).sample(100, 0.3);
        assert_eq!(a, b);
    }

    #[test]
    fn subsample_is_a_disjoint_partition() {
        let options = SamplingOptions::default();
        let mut sampler = RandomSampler::new(11, &options);
        let samples: Vec<usize> = (0..9).collect();
        let (inbag, held_out) = sampler.subsample(&samples, 0.5);
        assert_eq!(inbag.len(), 5);
        assert_eq!(held_out.len(), 4);
        let mut all: Vec<usize> = inbag.iter().chain(&held_out).copied().collect();
        all.sort_unstable();
        assert_eq!(all, samples);
    }

    #[test]
    fn cluster_labels_map_by_first_appearance() {
        let options = SamplingOptions::new(None, &[7, 3, 7, 9, 3, 7]);
        assert_eq!(options.clusters(), &[vec![0, 2, 5], vec![1, 4], vec![3]]);
        assert_eq!(options.samples_per_cluster(), 3);
    }

    #[test]
    fn sample_from_clusters_caps_cluster_size() {
        let options = SamplingOptions::new(Some(1), &[0, 0, 0, 1, 1]);
        let mut sampler = RandomSampler::new(5, &options);
        let rows = sampler.sample_from_clusters(&[0, 1]);
        assert_eq!(rows.len(), 2);
        assert!([0, 1, 2].contains(&rows[0]));
        assert!([3, 4].contains(&rows[1]));

        let all = sampler.get_samples_in_clusters(&[1, 0]);
        assert_eq!(all, vec![3, 4, 0, 1, 2]);
    }

    #[test]
    fn sample_clusters_draws_cluster_ids() {
        let options = SamplingOptions::new(None, &[0, 0, 1, 1, 2, 2, 3, 3]);
        let mut sampler = RandomSampler::new(1, &options);
        let ids = sampler.sample_clusters(8, 0.5);
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|&id| id < 4));
    }

    #[test]
    fn draw_skips_excluded_values() {
        let options = SamplingOptions::default();
        let skip: BTreeSet<usize> = [0, 3, 5].into_iter().collect();
        for seed in 0..20 {
            let mut sampler = RandomSampler::new(seed, &options);
            // simple path: 2 < 100 / 10
            let simple = sampler.draw(100, &skip, 2);
            // Fisher-Yates path
            let shuffled = sampler.draw(8, &skip, 4);
            for drawn in [&simple, &shuffled] {
                let unique: BTreeSet<usize> = drawn.iter().copied().collect();
                assert_eq!(unique.len(), drawn.len());
                assert!(drawn.iter().all(|v| !skip.contains(v)));
            }
            assert_eq!(simple.len(), 2);
            assert_eq!(shuffled.len(), 4);
            assert!(shuffled.iter().all(|&v| v < 8));
        }
    }

    #[test]
    fn draw_clamps_to_available_values() {
        let options = SamplingOptions::default();
        let skip: BTreeSet<usize> = [1].into_iter().collect();
        let mut sampler = RandomSampler::new(2, &options);
        let mut drawn = sampler.draw(3, &skip, 10);
        drawn.sort_unstable();
        assert_eq!(drawn, vec![0, 2]);
    }

    #[test]
    fn poisson_of_zero_mean_is_zero() {
        let options = SamplingOptions::default();
        let mut sampler = RandomSampler::new(2, &options);
        assert_eq!(sampler.sample_poisson(0), 0);
        let draws: Vec<usize> = (0..200).map(|_| sampler.sample_poisson(4)).collect();
        let mean = draws.iter().sum::<usize>() as f64 / 200.0;
        assert!((mean - 4.0).abs() < 1.0, "poisson mean drifted: {mean}");
    }
}
