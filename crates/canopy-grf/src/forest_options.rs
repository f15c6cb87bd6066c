//! Configuration builder for forest training.

use crate::error::ForestError;
use crate::sampling::SamplingOptions;
use crate::tree_trainer::TreeOptions;

/// Configuration for training a forest.
///
/// Construct via [`ForestOptions::new`], then chain `with_*` methods. The
/// full set of checks runs in [`ForestOptions::validate`], which the trainer
/// calls before any tree is grown.
///
/// # Defaults
///
/// | Parameter              | Default |
/// |------------------------|---------|
/// | `ci_group_size`        | 2       |
/// | `sample_fraction`      | 0.5     |
/// | `mtry`                 | `None` (`min(ceil(sqrt(p) + 20), p)`) |
/// | `min_node_size`        | 5       |
/// | `honesty`              | `true`  |
/// | `honesty_fraction`     | 0.5     |
/// | `honesty_prune_leaves` | `true`  |
/// | `alpha`                | 0.05    |
/// | `imbalance_penalty`    | 0.0     |
/// | `num_threads`          | 0 (all cores) |
/// | `seed`                 | 42      |
/// | `clusters`             | none    |
/// | `samples_per_cluster`  | `None` (no cap) |
#[derive(Debug, Clone, PartialEq)]
pub struct ForestOptions {
    num_trees: usize,
    ci_group_size: usize,
    sample_fraction: f64,
    tree_options: TreeOptions,
    num_threads: usize,
    seed: u64,
    clusters: Vec<usize>,
    samples_per_cluster: Option<usize>,
}

impl ForestOptions {
    /// Create options for `num_trees` trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `num_trees` is zero.
    pub fn new(num_trees: usize) -> Result<Self, ForestError> {
        if num_trees == 0 {
            return Err(ForestError::InvalidTreeCount { num_trees });
        }
        Ok(Self {
            num_trees,
            ci_group_size: 2,
            sample_fraction: 0.5,
            tree_options: TreeOptions::default(),
            num_threads: 0,
            seed: 42,
            clusters: Vec::new(),
            samples_per_cluster: None,
        })
    }

    /// Check every option and option combination.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::InvalidCiGroupSize`] | `ci_group_size` is zero |
    /// | [`ForestError::InvalidSampleFraction`] | `sample_fraction` outside (0, 1] |
    /// | [`ForestError::CiGroupSampleFraction`] | CI groups with `sample_fraction > 0.5` |
    /// | [`ForestError::InvalidHonestyFraction`] | `honesty_fraction` outside (0, 1) |
    /// | [`ForestError::InvalidAlpha`] | `alpha` outside [0, 0.25) |
    /// | [`ForestError::InvalidImbalancePenalty`] | negative or NaN penalty |
    pub fn validate(&self) -> Result<(), ForestError> {
        if self.ci_group_size == 0 {
            return Err(ForestError::InvalidCiGroupSize {
                ci_group_size: self.ci_group_size,
            });
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(ForestError::InvalidSampleFraction {
                fraction: self.sample_fraction,
            });
        }
        if self.ci_group_size > 1 && self.sample_fraction > 0.5 {
            return Err(ForestError::CiGroupSampleFraction {
                ci_group_size: self.ci_group_size,
                fraction: self.sample_fraction,
            });
        }
        let honesty_fraction = self.tree_options.honesty_fraction();
        if !(honesty_fraction > 0.0 && honesty_fraction < 1.0) {
            return Err(ForestError::InvalidHonestyFraction {
                fraction: honesty_fraction,
            });
        }
        let alpha = self.tree_options.alpha();
        if !(0.0..0.25).contains(&alpha) {
            return Err(ForestError::InvalidAlpha { alpha });
        }
        let penalty = self.tree_options.imbalance_penalty();
        if !(penalty >= 0.0) {
            return Err(ForestError::InvalidImbalancePenalty { penalty });
        }
        Ok(())
    }

    // --- Setters ---

    /// Set the number of trees per CI group (1 disables variance estimates).
    #[must_use]
    pub fn with_ci_group_size(mut self, ci_group_size: usize) -> Self {
        self.ci_group_size = ci_group_size;
        self
    }

    /// Set the share of sampling units drawn for each tree (or CI group half).
    #[must_use]
    pub fn with_sample_fraction(mut self, sample_fraction: f64) -> Self {
        self.sample_fraction = sample_fraction;
        self
    }

    /// Set the mean number of variables tried per split.
    #[must_use]
    pub fn with_mtry(mut self, mtry: Option<usize>) -> Self {
        self.tree_options = self.tree_options.with_mtry(mtry);
        self
    }

    /// Set the node size at or below which a node becomes a leaf.
    #[must_use]
    pub fn with_min_node_size(mut self, min_node_size: usize) -> Self {
        self.tree_options = self.tree_options.with_min_node_size(min_node_size);
        self
    }

    /// Enable or disable honest splitting.
    #[must_use]
    pub fn with_honesty(mut self, honesty: bool) -> Self {
        self.tree_options = self.tree_options.with_honesty(honesty);
        self
    }

    /// Set the share of a tree's sample used to choose splits when honest.
    #[must_use]
    pub fn with_honesty_fraction(mut self, honesty_fraction: f64) -> Self {
        self.tree_options = self.tree_options.with_honesty_fraction(honesty_fraction);
        self
    }

    /// Prune leaves left empty by honest repopulation.
    #[must_use]
    pub fn with_honesty_prune_leaves(mut self, honesty_prune_leaves: bool) -> Self {
        self.tree_options = self.tree_options.with_honesty_prune_leaves(honesty_prune_leaves);
        self
    }

    /// Set the minimum child share of a split.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.tree_options = self.tree_options.with_alpha(alpha);
        self
    }

    /// Set the penalty on unbalanced splits.
    #[must_use]
    pub fn with_imbalance_penalty(mut self, imbalance_penalty: f64) -> Self {
        self.tree_options = self.tree_options.with_imbalance_penalty(imbalance_penalty);
        self
    }

    /// Set the worker count. 0 uses all available cores.
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Assign every row a cluster label; whole clusters are then sampled.
    #[must_use]
    pub fn with_clusters(mut self, clusters: Vec<usize>) -> Self {
        self.clusters = clusters;
        self
    }

    /// Cap the rows drawn from each sampled cluster.
    #[must_use]
    pub fn with_samples_per_cluster(mut self, samples_per_cluster: Option<usize>) -> Self {
        self.samples_per_cluster = samples_per_cluster;
        self
    }

    // --- Getters ---

    /// Return the number of trees, rounded up to a multiple of `ci_group_size`.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        let group = self.ci_group_size.max(1);
        self.num_trees.div_ceil(group) * group
    }

    /// Return the number of CI groups.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.num_trees() / self.ci_group_size.max(1)
    }

    /// Return the number of trees per CI group.
    #[must_use]
    pub fn ci_group_size(&self) -> usize {
        self.ci_group_size
    }

    /// Return the sample fraction.
    #[must_use]
    pub fn sample_fraction(&self) -> f64 {
        self.sample_fraction
    }

    /// Return the per-tree growth options.
    #[must_use]
    pub fn tree_options(&self) -> &TreeOptions {
        &self.tree_options
    }

    /// Return the configured worker count (0 = all cores).
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the per-row cluster labels (empty without clusters).
    #[must_use]
    pub fn clusters(&self) -> &[usize] {
        &self.clusters
    }

    /// Return the sampling options derived from the cluster settings.
    #[must_use]
    pub fn sampling_options(&self) -> SamplingOptions {
        SamplingOptions::new(self.samples_per_cluster, &self.clusters)
    }
}
