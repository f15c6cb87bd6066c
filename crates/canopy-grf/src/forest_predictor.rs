//! Batch prediction over a trained forest.

use tracing::{info, instrument};

use crate::data::Data;
use crate::error::ForestError;
use crate::forest::Forest;
use crate::forest_trainer::validate_quantiles;
use crate::prediction::collector::{
    CollectionInput, DefaultPredictionCollector, OptimizedPredictionCollector, TreeTraverser,
};
use crate::prediction::{
    CausalSurvivalPredictionStrategy, DefaultPredictionStrategy, InstrumentalPredictionStrategy,
    LLCausalPredictionStrategy, LocalLinearPredictionStrategy, MultiCausalPredictionStrategy,
    MultiRegressionPredictionStrategy, OptimizedPredictionStrategy, Prediction,
    ProbabilityPredictionStrategy, QuantilePredictionStrategy, RegressionPredictionStrategy,
    SurvivalPredictionKind, SurvivalPredictionStrategy,
};
use crate::utility::build_thread_pool;

enum Collector {
    Optimized(OptimizedPredictionCollector),
    Default(DefaultPredictionCollector),
}

/// Predicts test samples from a forest with one prediction strategy.
pub struct ForestPredictor {
    num_threads: usize,
    collector: Collector,
}

impl ForestPredictor {
    fn optimized(num_threads: usize, strategy: Box<dyn OptimizedPredictionStrategy>) -> Self {
        Self {
            num_threads,
            collector: Collector::Optimized(OptimizedPredictionCollector::new(strategy)),
        }
    }

    fn default_strategy(num_threads: usize, strategy: Box<dyn DefaultPredictionStrategy>) -> Self {
        Self {
            num_threads,
            collector: Collector::Default(DefaultPredictionCollector::new(strategy)),
        }
    }

    /// Predict every row of `data` with every tree.
    ///
    /// `train_data` must be the table the forest was trained on; default
    /// strategies read its rows through the forest weights.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::VarianceRequiresCiGroups`] | variance requested with `ci_group_size == 1` |
    /// | [`ForestError::PredictionColumnMismatch`] | `data` lacks a column the forest splits on |
    /// | [`ForestError::TrainingRowMismatch`] | `train_data` is shorter than the drawn rows |
    /// | [`ForestError::PredictionLengthMismatch`] | an estimate has the wrong length |
    /// | [`ForestError::ThreadPool`] | the worker pool cannot be built |
    #[instrument(skip_all, fields(num_trees = forest.num_trees(), num_samples = data.num_rows()))]
    pub fn predict(
        &self,
        forest: &Forest,
        train_data: &Data,
        data: &Data,
        estimate_variance: bool,
    ) -> Result<Vec<Prediction>, ForestError> {
        self.run(forest, train_data, data, estimate_variance, false)
    }

    /// Predict every training row using only the trees that did not draw it.
    ///
    /// Optimized strategies also report out-of-bag error estimates. A row
    /// drawn by every tree gets NaN estimates.
    ///
    /// # Errors
    ///
    /// Same as [`ForestPredictor::predict`].
    #[instrument(skip_all, fields(num_trees = forest.num_trees(), num_samples = data.num_rows()))]
    pub fn predict_oob(
        &self,
        forest: &Forest,
        data: &Data,
        estimate_variance: bool,
    ) -> Result<Vec<Prediction>, ForestError> {
        self.run(forest, data, data, estimate_variance, true)
    }

    fn run(
        &self,
        forest: &Forest,
        train_data: &Data,
        data: &Data,
        estimate_variance: bool,
        oob_prediction: bool,
    ) -> Result<Vec<Prediction>, ForestError> {
        if estimate_variance && forest.ci_group_size() <= 1 {
            return Err(ForestError::VarianceRequiresCiGroups {
                ci_group_size: forest.ci_group_size(),
            });
        }
        let required = forest.required_columns();
        if data.num_cols() < required {
            return Err(ForestError::PredictionColumnMismatch {
                required,
                got: data.num_cols(),
            });
        }
        let required_rows = forest.required_rows();
        if train_data.num_rows() < required_rows {
            return Err(ForestError::TrainingRowMismatch {
                required: required_rows,
                got: train_data.num_rows(),
            });
        }

        let pool = build_thread_pool(self.num_threads)?;
        let leaf_nodes_by_tree = TreeTraverser::get_leaf_nodes(&pool, forest, data, oob_prediction);
        let valid_trees_by_sample =
            TreeTraverser::get_valid_trees_by_sample(forest, data, oob_prediction);

        let estimate_error = oob_prediction && matches!(self.collector, Collector::Optimized(_));
        let input = CollectionInput {
            forest,
            train_data,
            data,
            leaf_nodes_by_tree: &leaf_nodes_by_tree,
            valid_trees_by_sample: &valid_trees_by_sample,
            estimate_variance,
            estimate_error,
        };
        let predictions = match &self.collector {
            Collector::Optimized(collector) => collector.collect_predictions(&pool, &input)?,
            Collector::Default(collector) => collector.collect_predictions(&pool, &input)?,
        };
        info!(
            num_samples = predictions.len(),
            oob = oob_prediction,
            estimate_variance,
            "predictions complete"
        );
        Ok(predictions)
    }
}

/// Conditional mean.
#[must_use]
pub fn regression_predictor(num_threads: usize) -> ForestPredictor {
    ForestPredictor::optimized(num_threads, Box::new(RegressionPredictionStrategy))
}

/// Conditional means of `num_outcomes` outcomes.
#[must_use]
pub fn multi_regression_predictor(num_threads: usize, num_outcomes: usize) -> ForestPredictor {
    ForestPredictor::optimized(
        num_threads,
        Box::new(MultiRegressionPredictionStrategy::new(num_outcomes)),
    )
}

/// Local average treatment effect.
#[must_use]
pub fn instrumental_predictor(num_threads: usize) -> ForestPredictor {
    ForestPredictor::optimized(num_threads, Box::new(InstrumentalPredictionStrategy))
}

/// Effects of every treatment on every outcome, outcome-major.
#[must_use]
pub fn multi_causal_predictor(
    num_threads: usize,
    num_treatments: usize,
    num_outcomes: usize,
) -> ForestPredictor {
    ForestPredictor::optimized(
        num_threads,
        Box::new(MultiCausalPredictionStrategy::new(
            num_treatments,
            num_outcomes,
        )),
    )
}

/// Class probabilities.
///
/// # Errors
///
/// Returns [`ForestError::InvalidNumClasses`] if `num_classes < 2`.
pub fn probability_predictor(
    num_threads: usize,
    num_classes: usize,
) -> Result<ForestPredictor, ForestError> {
    if num_classes < 2 {
        return Err(ForestError::InvalidNumClasses { num_classes });
    }
    Ok(ForestPredictor::optimized(
        num_threads,
        Box::new(ProbabilityPredictionStrategy::new(num_classes)),
    ))
}

/// Weighted empirical quantiles of the training outcomes, one per entry of
/// `quantiles` in the order given.
///
/// # Errors
///
/// | Variant | When |
/// |---|---|
/// | [`ForestError::EmptyQuantiles`] | `quantiles` is empty |
/// | [`ForestError::InvalidQuantile`] | a quantile is outside (0, 1) |
pub fn quantile_predictor(
    num_threads: usize,
    quantiles: Vec<f64>,
) -> Result<ForestPredictor, ForestError> {
    validate_quantiles(&quantiles)?;
    Ok(ForestPredictor::default_strategy(
        num_threads,
        Box::new(QuantilePredictionStrategy::new(quantiles)),
    ))
}

/// Survival curves on the distinct failure times of `train_data`.
#[must_use]
pub fn survival_predictor(
    num_threads: usize,
    train_data: &Data,
    kind: SurvivalPredictionKind,
) -> ForestPredictor {
    ForestPredictor::default_strategy(
        num_threads,
        Box::new(SurvivalPredictionStrategy::from_training_data(
            train_data, kind,
        )),
    )
}

/// Local linear regression, one estimate per ridge penalty in `lambdas`.
///
/// # Errors
///
/// Returns [`ForestError::EmptyLambdas`] if `lambdas` is empty.
pub fn ll_regression_predictor(
    num_threads: usize,
    lambdas: Vec<f64>,
    weight_penalty: bool,
    linear_correction_variables: Vec<usize>,
) -> Result<ForestPredictor, ForestError> {
    if lambdas.is_empty() {
        return Err(ForestError::EmptyLambdas);
    }
    Ok(ForestPredictor::default_strategy(
        num_threads,
        Box::new(LocalLinearPredictionStrategy::new(
            lambdas,
            weight_penalty,
            linear_correction_variables,
        )),
    ))
}

/// Local linear treatment effect, one estimate per ridge penalty in `lambdas`.
///
/// # Errors
///
/// Returns [`ForestError::EmptyLambdas`] if `lambdas` is empty.
pub fn ll_causal_predictor(
    num_threads: usize,
    lambdas: Vec<f64>,
    weight_penalty: bool,
    linear_correction_variables: Vec<usize>,
) -> Result<ForestPredictor, ForestError> {
    if lambdas.is_empty() {
        return Err(ForestError::EmptyLambdas);
    }
    Ok(ForestPredictor::default_strategy(
        num_threads,
        Box::new(LLCausalPredictionStrategy::new(
            lambdas,
            weight_penalty,
            linear_correction_variables,
        )),
    ))
}

/// Treatment effect on a survival functional.
#[must_use]
pub fn causal_survival_predictor(num_threads: usize) -> ForestPredictor {
    ForestPredictor::optimized(num_threads, Box::new(CausalSurvivalPredictionStrategy))
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::forest_options::ForestOptions;
    use crate::forest_trainer::{quantile_trainer, regression_trainer};

    /// y = 2 when x0 > 0.5 else 0, plus small noise; x1 is noise.
    fn step_data(n: usize, seed: u64) -> Data {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let rows: Vec<Vec<f64>> = (0..n)
            .map(|_| {
                let x0: f64 = rng.r#gen();
                let x1: f64 = rng.r#gen();
                let noise: f64 = rng.gen_range(-0.1..0.1);
                let y = if x0 > 0.5 { 2.0 } else { 0.0 } + noise;
                vec![x0, x1, y]
            })
            .collect();
        Data::from_rows(&rows).unwrap().with_outcome_index(2).unwrap()
    }

    fn trained_forest(data: &Data, ci_group_size: usize) -> Forest {
        let options = ForestOptions::new(40)
            .unwrap()
            .with_ci_group_size(ci_group_size)
            .with_num_threads(2);
        regression_trainer().train(data, &options).unwrap()
    }

    #[test]
    fn regression_forest_recovers_the_step() {
        let data = step_data(400, 1);
        let forest = trained_forest(&data, 2);
        let test = Data::from_rows(&[vec![0.1, 0.5], vec![0.9, 0.5]]).unwrap();
        let predictions = regression_predictor(2)
            .predict(&forest, &data, &test, true)
            .unwrap();
        assert_eq!(predictions.len(), 2);
        assert!(predictions[0].predictions()[0] < 0.5);
        assert!(predictions[1].predictions()[0] > 1.5);
        for prediction in &predictions {
            assert_eq!(prediction.variance_estimates().len(), 1);
            assert!(prediction.variance_estimates()[0] >= 0.0);
            assert!(!prediction.contains_error_estimates());
        }
    }

    #[test]
    fn oob_predictions_carry_error_estimates() {
        let data = step_data(200, 2);
        let forest = trained_forest(&data, 2);
        let predictions = regression_predictor(1).predict_oob(&forest, &data, false).unwrap();
        assert_eq!(predictions.len(), data.num_rows());
        let finite = predictions
            .iter()
            .filter(|p| p.predictions()[0].is_finite())
            .count();
        assert!(finite > data.num_rows() / 2);
        assert!(predictions.iter().all(Prediction::contains_error_estimates));
        assert!(!predictions[0].contains_variance_estimates());
    }

    #[test]
    fn rows_drawn_by_every_tree_are_nan_out_of_bag() {
        let data = step_data(60, 3);
        let options = ForestOptions::new(4)
            .unwrap()
            .with_ci_group_size(1)
            .with_sample_fraction(1.0)
            .with_num_threads(1);
        let forest = regression_trainer().train(&data, &options).unwrap();
        let predictions = regression_predictor(1).predict_oob(&forest, &data, false).unwrap();
        assert!(predictions.iter().all(|p| p.predictions()[0].is_nan()));
        assert!(predictions.iter().all(|p| p.error_estimates()[0].is_nan()));
    }

    #[test]
    fn variance_needs_ci_groups() {
        let data = step_data(100, 4);
        let forest = trained_forest(&data, 1);
        let err = regression_predictor(1)
            .predict(&forest, &data, &data, true)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::VarianceRequiresCiGroups { ci_group_size: 1 }
        ));
    }

    #[test]
    fn training_data_must_cover_drawn_rows() {
        let data = step_data(200, 5);
        let forest = quantile_trainer(vec![0.5])
            .unwrap()
            .train(&data, &ForestOptions::new(10).unwrap().with_num_threads(1))
            .unwrap();
        let truncated = step_data(50, 5);
        let test = Data::from_rows(&[vec![0.3, 0.3]]).unwrap();
        let err = quantile_predictor(1, vec![0.5])
            .unwrap()
            .predict(&forest, &truncated, &test, false)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::TrainingRowMismatch { got: 50, required } if required > 50
        ));
    }

    #[test]
    fn test_data_must_cover_split_columns() {
        let data = step_data(200, 5);
        let forest = trained_forest(&data, 2);
        let narrow = Data::from_rows(&[vec![0.3]]).unwrap();
        let err = regression_predictor(1)
            .predict(&forest, &data, &narrow, false)
            .unwrap_err();
        assert!(matches!(err, ForestError::PredictionColumnMismatch { got: 1, .. }));
    }

    #[test]
    fn quantile_forest_orders_its_quantiles() {
        let data = step_data(300, 6);
        let quantiles = vec![0.1, 0.5, 0.9];
        let options = ForestOptions::new(20).unwrap().with_num_threads(1);
        let forest = quantile_trainer(quantiles.clone())
            .unwrap()
            .train(&data, &options)
            .unwrap();
        let test = Data::from_rows(&[vec![0.8, 0.2]]).unwrap();
        let predictions = quantile_predictor(1, quantiles)
            .unwrap()
            .predict(&forest, &data, &test, false)
            .unwrap();
        let values = predictions[0].predictions();
        assert_eq!(values.len(), 3);
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!(values[1] > 1.5);
    }

    #[test]
    fn repeated_quantiles_repeat_predictions() {
        let data = step_data(200, 7);
        let options = ForestOptions::new(10).unwrap().with_num_threads(1);
        let forest = quantile_trainer(vec![0.5])
            .unwrap()
            .train(&data, &options)
            .unwrap();
        let test = Data::from_rows(&[vec![0.2, 0.7], vec![0.7, 0.1]]).unwrap();
        let single = quantile_predictor(1, vec![0.5])
            .unwrap()
            .predict(&forest, &data, &test, false)
            .unwrap();
        let repeated = quantile_predictor(1, vec![0.5, 0.5, 0.5])
            .unwrap()
            .predict(&forest, &data, &test, false)
            .unwrap();
        for (one, many) in single.iter().zip(&repeated) {
            assert!(many.predictions().iter().all(|v| *v == one.predictions()[0]));
        }
    }

    #[test]
    fn quantile_order_is_preserved_end_to_end() {
        let data = step_data(200, 7);
        let options = ForestOptions::new(10).unwrap().with_num_threads(1);
        let ascending_forest = quantile_trainer(vec![0.1, 0.9])
            .unwrap()
            .train(&data, &options)
            .unwrap();
        let descending_forest = quantile_trainer(vec![0.9, 0.1])
            .unwrap()
            .train(&data, &options)
            .unwrap();
        assert_eq!(ascending_forest.trees(), descending_forest.trees());

        let test = Data::from_rows(&[vec![0.2, 0.7], vec![0.7, 0.1]]).unwrap();
        let ascending = quantile_predictor(1, vec![0.1, 0.9])
            .unwrap()
            .predict(&ascending_forest, &data, &test, false)
            .unwrap();
        let descending = quantile_predictor(1, vec![0.9, 0.1])
            .unwrap()
            .predict(&ascending_forest, &data, &test, false)
            .unwrap();
        for (up, down) in ascending.iter().zip(&descending) {
            let mut reversed = down.predictions().to_vec();
            reversed.reverse();
            assert_eq!(up.predictions(), reversed.as_slice());
            assert!(down.predictions()[0] >= down.predictions()[1]);
        }
    }

    #[test]
    fn predictor_arguments_are_validated() {
        assert!(matches!(
            probability_predictor(1, 0),
            Err(ForestError::InvalidNumClasses { num_classes: 0 })
        ));
        assert!(matches!(
            quantile_predictor(1, vec![0.0]),
            Err(ForestError::InvalidQuantile { .. })
        ));
        assert!(matches!(
            ll_regression_predictor(1, Vec::new(), false, vec![0]),
            Err(ForestError::EmptyLambdas)
        ));
        assert!(matches!(
            ll_causal_predictor(1, Vec::new(), false, vec![0]),
            Err(ForestError::EmptyLambdas)
        ));
    }
}
