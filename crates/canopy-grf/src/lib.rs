//! Generalized random forests: train, predict, estimate variance.
//!
//! A forest is grown from three pluggable strategies. A relabeling strategy
//! turns each node's observations into pseudo-outcomes, a splitting rule
//! picks the split that best separates them, and a prediction strategy
//! turns the leaves a test sample reaches into an estimate. Trees are honest
//! (one half of each tree's sample places splits, the other fills leaves)
//! and grown in groups on shared half-samples, which gives grouped jackknife
//! variance estimates at prediction time.
//!
//! ```no_run
//! use canopy_grf::{Data, ForestOptions, regression_predictor, regression_trainer};
//!
//! # fn main() -> Result<(), canopy_grf::ForestError> {
//! let rows = vec![vec![0.1, 1.0], vec![0.7, 3.0], vec![0.4, 2.0]];
//! let data = Data::from_rows(&rows)?.with_outcome_index(1)?;
//! let forest = regression_trainer().train(&data, &ForestOptions::new(100)?)?;
//! let predictions = regression_predictor(0).predict(&forest, &data, &data, true)?;
//! # Ok(())
//! # }
//! ```

mod analysis;
mod data;
mod error;
mod forest;
mod forest_options;
mod forest_predictor;
mod forest_trainer;
mod node;
pub mod prediction;
pub mod relabeling;
mod sampling;
mod serialize;
pub mod splitting;
mod tree;
mod tree_trainer;
mod utility;

pub use analysis::{RankedVariable, rank_variables, split_frequencies, variable_importance};
pub use data::{Data, DataRole};
pub use error::ForestError;
pub use forest::Forest;
pub use forest_options::ForestOptions;
pub use forest_predictor::{
    ForestPredictor, causal_survival_predictor, instrumental_predictor, ll_causal_predictor,
    ll_regression_predictor, multi_causal_predictor, multi_regression_predictor,
    probability_predictor, quantile_predictor, regression_predictor, survival_predictor,
};
pub use forest_trainer::{
    ForestTrainer, causal_survival_trainer, instrumental_trainer, ll_regression_trainer,
    multi_causal_trainer, multi_regression_trainer, probability_trainer, quantile_trainer,
    regression_trainer, survival_trainer,
};
pub use node::{FeatureIndex, Node, NodeIndex};
pub use prediction::{Prediction, PredictionValues, SurvivalPredictionKind};
pub use sampling::{RandomSampler, SamplingOptions};
pub use tree::Tree;
pub use tree_trainer::{TreeOptions, TreeTrainer};
pub use utility::{equal_doubles, split_sequence};
