//! Relabeling strategies: turn raw observations into per-node pseudo-outcomes.

mod causal_survival;
mod instrumental;
mod ll_regression;
mod multi_causal;
mod multi_noop;
mod noop;
mod quantile;

use ndarray::Array2;

use crate::data::Data;

pub use causal_survival::CausalSurvivalRelabelingStrategy;
pub use instrumental::InstrumentalRelabelingStrategy;
pub use ll_regression::LLRegressionRelabelingStrategy;
pub use multi_causal::MultiCausalRelabelingStrategy;
pub use multi_noop::MultiNoopRelabelingStrategy;
pub use noop::NoopRelabelingStrategy;
pub use quantile::QuantileRelabelingStrategy;

/// Writes one pseudo-outcome row per node sample.
///
/// `responses` has one row per data row and [`response_length`] columns;
/// only the rows of `samples` are written. Returning `true` means the node
/// cannot be relabeled and must become a leaf.
///
/// [`response_length`]: RelabelingStrategy::response_length
pub trait RelabelingStrategy: Send + Sync {
    /// Relabel the samples of one node.
    fn relabel(&self, samples: &[usize], data: &Data, responses: &mut Array2<f64>) -> bool;

    /// Width of a pseudo-outcome row.
    fn response_length(&self) -> usize {
        1
    }
}
