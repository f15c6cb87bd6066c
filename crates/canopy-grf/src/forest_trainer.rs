//! Forest training with parallel tree construction.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::data::{Data, DataRole};
use crate::error::ForestError;
use crate::forest::Forest;
use crate::forest_options::ForestOptions;
use crate::prediction::{
    CausalSurvivalPredictionStrategy, InstrumentalPredictionStrategy,
    MultiCausalPredictionStrategy, MultiRegressionPredictionStrategy,
    OptimizedPredictionStrategy, ProbabilityPredictionStrategy, RegressionPredictionStrategy,
};
use crate::relabeling::{
    CausalSurvivalRelabelingStrategy, InstrumentalRelabelingStrategy,
    LLRegressionRelabelingStrategy, MultiCausalRelabelingStrategy, MultiNoopRelabelingStrategy,
    NoopRelabelingStrategy, QuantileRelabelingStrategy, RelabelingStrategy,
};
use crate::sampling::{RandomSampler, SamplingOptions};
use crate::splitting::{
    CausalSurvivalSplittingRuleFactory, InstrumentalSplittingRuleFactory,
    MultiCausalSplittingRuleFactory, MultiRegressionSplittingRuleFactory,
    ProbabilitySplittingRuleFactory, RegressionSplittingRuleFactory, SplittingRuleFactory,
    SurvivalSplittingRuleFactory,
};
use crate::tree::Tree;
use crate::tree_trainer::{TreeOptions, TreeTrainer};
use crate::utility::{build_thread_pool, map_ranges};

/// Trains forests for one estimand.
///
/// Built by one of the factory functions in this module, which fix the
/// relabeling, splitting and leaf-statistic strategies and the data roles
/// training requires.
pub struct ForestTrainer {
    tree_trainer: TreeTrainer,
    required_roles: Vec<DataRole>,
    num_classes: Option<usize>,
}

/// Number of candidate variables tried per split when `mtry` is unset.
pub(crate) fn resolve_mtry(mtry: Option<usize>, num_eligible: usize) -> usize {
    mtry.unwrap_or_else(|| {
        let default = ((num_eligible as f64).sqrt() + 20.0).ceil() as usize;
        default.min(num_eligible)
    })
}

impl ForestTrainer {
    fn new(tree_trainer: TreeTrainer, required_roles: Vec<DataRole>) -> Self {
        Self {
            tree_trainer,
            required_roles,
            num_classes: None,
        }
    }

    fn with_class_labels(mut self, num_classes: usize) -> Self {
        self.num_classes = Some(num_classes);
        self
    }

    /// Return the data roles this trainer needs.
    #[must_use]
    pub fn required_roles(&self) -> &[DataRole] {
        &self.required_roles
    }

    /// Train a forest on `data`.
    ///
    /// Trees are grown in CI groups; each worker handles a contiguous range
    /// of groups with its own generator seeded from `seed + range start`.
    /// Results therefore depend on the seed and the thread count.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | any [`ForestOptions::validate`] error | invalid options |
    /// | [`ForestError::MissingDataRole`] | `data` lacks a required column role |
    /// | [`ForestError::InvalidClassLabel`] | an outcome is not a class label in range |
    /// | [`ForestError::ClusterCountMismatch`] | cluster labels do not cover every row |
    /// | [`ForestError::SampleFractionTooSmall`] | a tree would draw no samples |
    /// | [`ForestError::HonestyFractionDegenerate`] | an honesty half would be empty |
    /// | [`ForestError::ThreadPool`] | the worker pool cannot be built |
    #[instrument(skip_all, fields(num_rows = data.num_rows(), num_trees = options.num_trees()))]
    pub fn train(&self, data: &Data, options: &ForestOptions) -> Result<Forest, ForestError> {
        // --- Validate options ---
        options.validate()?;

        // --- Validate data ---
        for &role in &self.required_roles {
            if !data.has_role(role) {
                return Err(ForestError::MissingDataRole { role });
            }
        }
        if let Some(num_classes) = self.num_classes {
            validate_class_labels(data, num_classes)?;
        }

        let num_rows = data.num_rows();
        if !options.clusters().is_empty() && options.clusters().len() != num_rows {
            return Err(ForestError::ClusterCountMismatch {
                expected: num_rows,
                got: options.clusters().len(),
            });
        }
        let sampling_options = options.sampling_options();
        let num_units = if sampling_options.clusters().is_empty() {
            num_rows
        } else {
            sampling_options.clusters().len()
        };
        validate_sample_sizes(options, num_units, num_rows)?;

        let num_eligible = data.num_cols() - data.disallowed_split_variables().len();
        let mtry = resolve_mtry(options.tree_options().mtry(), num_eligible);
        let tree_options = options.tree_options().clone().with_mtry(Some(mtry));

        let pool = build_thread_pool(options.num_threads())?;
        let num_groups = options.num_groups();
        info!(
            num_trees = options.num_trees(),
            num_groups,
            ci_group_size = options.ci_group_size(),
            num_units,
            mtry,
            threads = pool.current_num_threads(),
            "training forest"
        );

        let seed = options.seed();
        let batches = map_ranges(&pool, num_groups, |start, end| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(start as u64));
            let mut trees = Vec::with_capacity((end - start) * options.ci_group_size());
            for _ in start..end {
                let group_seed: u64 = rng.r#gen();
                trees.extend(self.train_group(
                    data,
                    group_seed,
                    &sampling_options,
                    options,
                    &tree_options,
                ));
            }
            debug!(start, end, trees = trees.len(), "trained group batch");
            trees
        });

        let trees: Vec<Tree> = batches.into_iter().flatten().collect();
        debug!(num_trees = trees.len(), "forest training complete");
        Ok(Forest::new(trees, data.num_cols(), options.ci_group_size()))
    }

    /// Grow one CI group. With groups, every tree draws its sample from the
    /// same half of the sampling units.
    fn train_group(
        &self,
        data: &Data,
        seed: u64,
        sampling_options: &SamplingOptions,
        options: &ForestOptions,
        tree_options: &TreeOptions,
    ) -> Vec<Tree> {
        let mut sampler = RandomSampler::new(seed, sampling_options);
        let ci_group_size = options.ci_group_size();
        if ci_group_size == 1 {
            let clusters = sampler.sample_clusters(data.num_rows(), options.sample_fraction());
            return vec![self.tree_trainer.train(data, &mut sampler, &clusters, tree_options)];
        }

        let half = sampler.sample_clusters(data.num_rows(), 0.5);
        (0..ci_group_size)
            .map(|_| {
                let (clusters, _) = sampler.subsample(&half, options.sample_fraction() * 2.0);
                self.tree_trainer.train(data, &mut sampler, &clusters, tree_options)
            })
            .collect()
    }
}

fn validate_class_labels(data: &Data, num_classes: usize) -> Result<(), ForestError> {
    for row in 0..data.num_rows() {
        let value = data.get_outcome(row);
        if !(value >= 0.0 && value.fract() == 0.0 && value < num_classes as f64) {
            return Err(ForestError::InvalidClassLabel {
                row,
                value,
                num_classes,
            });
        }
    }
    Ok(())
}

/// Check that every tree draws samples and both honesty halves are non-empty.
fn validate_sample_sizes(
    options: &ForestOptions,
    num_units: usize,
    num_rows: usize,
) -> Result<(), ForestError> {
    let sample_fraction = options.sample_fraction();
    let drawn = if options.ci_group_size() > 1 {
        let half = (num_units as f64 * 0.5) as usize;
        (half as f64 * sample_fraction * 2.0).ceil() as usize
    } else {
        (num_units as f64 * sample_fraction) as usize
    };
    if drawn == 0 {
        return Err(ForestError::SampleFractionTooSmall {
            fraction: sample_fraction,
            num_rows,
        });
    }

    let tree_options = options.tree_options();
    if tree_options.honesty() {
        let growing = (drawn as f64 * tree_options.honesty_fraction()).ceil() as usize;
        if growing == 0 || growing >= drawn {
            return Err(ForestError::HonestyFractionDegenerate {
                honesty_fraction: tree_options.honesty_fraction(),
                sample_fraction,
                num_rows,
            });
        }
    }
    Ok(())
}

fn trainer(
    relabeling: impl RelabelingStrategy + 'static,
    splitting: Box<dyn SplittingRuleFactory>,
    prediction: Option<Box<dyn OptimizedPredictionStrategy>>,
    required_roles: Vec<DataRole>,
) -> ForestTrainer {
    ForestTrainer::new(
        TreeTrainer::new(Box::new(relabeling), splitting, prediction),
        required_roles,
    )
}

/// Conditional mean of the outcome.
#[must_use]
pub fn regression_trainer() -> ForestTrainer {
    trainer(
        NoopRelabelingStrategy,
        Box::new(RegressionSplittingRuleFactory),
        Some(Box::new(RegressionPredictionStrategy)),
        vec![DataRole::Outcome],
    )
}

/// Conditional means of several outcomes, split jointly.
#[must_use]
pub fn multi_regression_trainer(num_outcomes: usize) -> ForestTrainer {
    trainer(
        MultiNoopRelabelingStrategy::new(num_outcomes),
        Box::new(MultiRegressionSplittingRuleFactory::new(num_outcomes)),
        Some(Box::new(MultiRegressionPredictionStrategy::new(num_outcomes))),
        vec![DataRole::Outcome],
    )
}

/// Local average treatment effect with an instrument.
///
/// A causal forest is the special case where the treatment is its own
/// instrument.
///
/// # Errors
///
/// Returns [`ForestError::InvalidReducedFormWeight`] if
/// `reduced_form_weight` is outside [0, 1].
pub fn instrumental_trainer(
    reduced_form_weight: f64,
    stabilize_splits: bool,
) -> Result<ForestTrainer, ForestError> {
    if !(0.0..=1.0).contains(&reduced_form_weight) {
        return Err(ForestError::InvalidReducedFormWeight {
            weight: reduced_form_weight,
        });
    }
    let splitting: Box<dyn SplittingRuleFactory> = if stabilize_splits {
        Box::new(InstrumentalSplittingRuleFactory)
    } else {
        Box::new(RegressionSplittingRuleFactory)
    };
    Ok(trainer(
        InstrumentalRelabelingStrategy::new(reduced_form_weight),
        splitting,
        Some(Box::new(InstrumentalPredictionStrategy)),
        vec![DataRole::Outcome, DataRole::Treatment, DataRole::Instrument],
    ))
}

/// Effects of several treatments on several outcomes.
///
/// `gradient_weights` scales the pseudo-outcome of each `(outcome, treatment)`
/// pair; empty means all ones.
///
/// # Errors
///
/// Returns [`ForestError::GradientWeightsLength`] if `gradient_weights` is
/// neither empty nor `num_outcomes * num_treatments` long.
pub fn multi_causal_trainer(
    num_treatments: usize,
    num_outcomes: usize,
    stabilize_splits: bool,
    gradient_weights: Vec<f64>,
) -> Result<ForestTrainer, ForestError> {
    let response_length = num_treatments * num_outcomes;
    if !gradient_weights.is_empty() && gradient_weights.len() != response_length {
        return Err(ForestError::GradientWeightsLength {
            expected: response_length,
            got: gradient_weights.len(),
        });
    }
    let splitting: Box<dyn SplittingRuleFactory> = if stabilize_splits {
        Box::new(MultiCausalSplittingRuleFactory::new(
            response_length,
            num_treatments,
        ))
    } else {
        Box::new(MultiRegressionSplittingRuleFactory::new(response_length))
    };
    Ok(trainer(
        MultiCausalRelabelingStrategy::new(num_treatments, num_outcomes, gradient_weights),
        splitting,
        Some(Box::new(MultiCausalPredictionStrategy::new(
            num_treatments,
            num_outcomes,
        ))),
        vec![DataRole::Outcome, DataRole::Treatment],
    ))
}

/// Class probabilities for outcomes labelled `0..num_classes`.
///
/// # Errors
///
/// Returns [`ForestError::InvalidNumClasses`] if `num_classes < 2`.
pub fn probability_trainer(num_classes: usize) -> Result<ForestTrainer, ForestError> {
    if num_classes < 2 {
        return Err(ForestError::InvalidNumClasses { num_classes });
    }
    Ok(trainer(
        NoopRelabelingStrategy,
        Box::new(ProbabilitySplittingRuleFactory::new(num_classes)),
        Some(Box::new(ProbabilityPredictionStrategy::new(num_classes))),
        vec![DataRole::Outcome],
    )
    .with_class_labels(num_classes))
}

/// Conditional quantiles. Splits separate the node's outcome quantile bins.
/// The order of `quantiles` does not affect the trees.
///
/// # Errors
///
/// | Variant | When |
/// |---|---|
/// | [`ForestError::EmptyQuantiles`] | `quantiles` is empty |
/// | [`ForestError::InvalidQuantile`] | a quantile is outside (0, 1) |
pub fn quantile_trainer(quantiles: Vec<f64>) -> Result<ForestTrainer, ForestError> {
    validate_quantiles(&quantiles)?;
    let num_classes = quantiles.len() + 1;
    Ok(trainer(
        QuantileRelabelingStrategy::new(quantiles),
        Box::new(ProbabilitySplittingRuleFactory::new(num_classes)),
        None,
        vec![DataRole::Outcome],
    ))
}

pub(crate) fn validate_quantiles(quantiles: &[f64]) -> Result<(), ForestError> {
    if quantiles.is_empty() {
        return Err(ForestError::EmptyQuantiles);
    }
    if let Some(&quantile) = quantiles.iter().find(|q| !(**q > 0.0 && **q < 1.0)) {
        return Err(ForestError::InvalidQuantile { quantile });
    }
    Ok(())
}

/// Forests whose splits target local-linear residuals.
///
/// Nodes with fewer than `split_cutoff` samples reuse `overall_beta`
/// (intercept first, then one coefficient per `split_variables` entry).
#[must_use]
pub fn ll_regression_trainer(
    split_lambda: f64,
    weight_penalty: bool,
    overall_beta: Vec<f64>,
    split_cutoff: usize,
    split_variables: Vec<usize>,
) -> ForestTrainer {
    trainer(
        LLRegressionRelabelingStrategy::new(
            split_lambda,
            weight_penalty,
            overall_beta,
            split_cutoff,
            split_variables,
        ),
        Box::new(RegressionSplittingRuleFactory),
        None,
        vec![DataRole::Outcome],
    )
}

/// Survival curves from right-censored outcomes.
#[must_use]
pub fn survival_trainer() -> ForestTrainer {
    trainer(
        NoopRelabelingStrategy,
        Box::new(SurvivalSplittingRuleFactory),
        None,
        vec![DataRole::Outcome, DataRole::Censor],
    )
}

/// Treatment effects on a survival functional.
#[must_use]
pub fn causal_survival_trainer(stabilize_splits: bool) -> ForestTrainer {
    let splitting: Box<dyn SplittingRuleFactory> = if stabilize_splits {
        Box::new(CausalSurvivalSplittingRuleFactory)
    } else {
        Box::new(RegressionSplittingRuleFactory)
    };
    trainer(
        CausalSurvivalRelabelingStrategy,
        splitting,
        Some(Box::new(CausalSurvivalPredictionStrategy)),
        vec![
            DataRole::Treatment,
            DataRole::Censor,
            DataRole::CausalSurvivalNumerator,
            DataRole::CausalSurvivalDenominator,
        ],
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    /// y = x0 + noise-free step on x1; column 2 is the outcome.
    fn regression_data(n: usize) -> Data {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|_| {
                let x0: f64 = rng.r#gen();
                let x1: f64 = rng.r#gen();
                let y = x0 + if x1 > 0.5 { 1.0 } else { 0.0 };
                vec![x0, x1, y]
            })
            .collect();
        Data::from_rows(&rows).unwrap().with_outcome_index(2).unwrap()
    }

    #[test]
    fn default_mtry_is_capped_by_eligible_columns() {
        assert_eq!(resolve_mtry(None, 2), 2);
        assert_eq!(resolve_mtry(None, 100), 30);
        assert_eq!(resolve_mtry(Some(3), 100), 3);
    }

    #[test]
    fn tree_count_rounds_up_to_groups() {
        let data = regression_data(200);
        let options = ForestOptions::new(5).unwrap().with_ci_group_size(2);
        let forest = regression_trainer().train(&data, &options).unwrap();
        assert_eq!(forest.num_trees(), 6);
        assert_eq!(forest.ci_group_size(), 2);
        assert_eq!(forest.num_variables(), 3);
    }

    #[test]
    fn same_seed_and_threads_reproduce_the_forest() {
        let data = regression_data(150);
        let options = ForestOptions::new(8).unwrap().with_num_threads(2).with_seed(11);
        let first = regression_trainer().train(&data, &options).unwrap();
        let second = regression_trainer().train(&data, &options).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn outcome_column_is_never_split_on() {
        let data = regression_data(200);
        let options = ForestOptions::new(10).unwrap().with_num_threads(1);
        let forest = regression_trainer().train(&data, &options).unwrap();
        assert!(forest.required_columns() <= 2);
    }

    #[test]
    fn honest_leaves_are_disjoint_and_exclude_split_samples() {
        let data = regression_data(200);
        let options = ForestOptions::new(6)
            .unwrap()
            .with_num_threads(1)
            .with_min_node_size(2)
            .with_honesty_prune_leaves(false);
        let forest = regression_trainer().train(&data, &options).unwrap();
        for tree in forest.trees() {
            let drawn: BTreeSet<usize> = tree.drawn_samples().iter().copied().collect();
            let mut seen = BTreeSet::new();
            for samples in tree.leaf_samples() {
                for &sample in samples {
                    assert!(drawn.contains(&sample));
                    assert!(seen.insert(sample), "sample {sample} in two leaves");
                }
            }
            // the honest half is the smaller share of the drawn samples
            assert!(seen.len() < drawn.len());
        }
    }

    #[test]
    fn missing_roles_are_rejected() {
        let data = regression_data(50);
        let trainer = instrumental_trainer(0.0, true).unwrap();
        let options = ForestOptions::new(2).unwrap();
        assert!(matches!(
            trainer.train(&data, &options),
            Err(ForestError::MissingDataRole {
                role: DataRole::Treatment
            })
        ));
    }

    #[test]
    fn class_labels_are_checked() {
        let rows = vec![vec![0.1, 0.0], vec![0.2, 1.0], vec![0.3, 2.5]];
        let data = Data::from_rows(&rows).unwrap().with_outcome_index(1).unwrap();
        let options = ForestOptions::new(2).unwrap();
        let err = probability_trainer(3).unwrap().train(&data, &options).unwrap_err();
        assert!(matches!(err, ForestError::InvalidClassLabel { row: 2, .. }));
    }

    #[test]
    fn tiny_samples_are_rejected_before_training() {
        let data = regression_data(3);
        let options = ForestOptions::new(2)
            .unwrap()
            .with_ci_group_size(1)
            .with_sample_fraction(0.2);
        assert!(matches!(
            regression_trainer().train(&data, &options),
            Err(ForestError::SampleFractionTooSmall { .. })
        ));

        let options = ForestOptions::new(2)
            .unwrap()
            .with_ci_group_size(1)
            .with_sample_fraction(0.4);
        assert!(matches!(
            regression_trainer().train(&data, &options),
            Err(ForestError::HonestyFractionDegenerate { .. })
        ));
    }

    #[test]
    fn cluster_labels_must_cover_rows() {
        let data = regression_data(20);
        let options = ForestOptions::new(2).unwrap().with_clusters(vec![0, 1, 2]);
        assert!(matches!(
            regression_trainer().train(&data, &options),
            Err(ForestError::ClusterCountMismatch {
                expected: 20,
                got: 3
            })
        ));
    }

    #[test]
    fn factory_arguments_are_validated() {
        assert!(matches!(
            instrumental_trainer(1.5, false),
            Err(ForestError::InvalidReducedFormWeight { .. })
        ));
        assert!(matches!(
            multi_causal_trainer(2, 1, true, vec![1.0]),
            Err(ForestError::GradientWeightsLength {
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            probability_trainer(1),
            Err(ForestError::InvalidNumClasses { num_classes: 1 })
        ));
        assert!(matches!(quantile_trainer(Vec::new()), Err(ForestError::EmptyQuantiles)));
        assert!(matches!(
            quantile_trainer(vec![0.5, 1.0]),
            Err(ForestError::InvalidQuantile { .. })
        ));
    }

    #[test]
    fn clustered_trees_draw_whole_clusters() {
        let data = regression_data(60);
        let clusters: Vec<usize> = (0..60).map(|row| row / 6).collect();
        let options = ForestOptions::new(4)
            .unwrap()
            .with_num_threads(1)
            .with_clusters(clusters.clone());
        let forest = regression_trainer().train(&data, &options).unwrap();
        for tree in forest.trees() {
            let drawn: BTreeSet<usize> = tree.drawn_samples().iter().copied().collect();
            for &row in &drawn {
                let cluster = clusters[row];
                assert!((cluster * 6..cluster * 6 + 6).all(|member| drawn.contains(&member)));
            }
        }
    }
}
