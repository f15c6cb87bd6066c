//! Per-leaf sufficient statistics and per-sample prediction results.

/// Precomputed statistics for every node of one tree.
///
/// Node `n` holds either `num_types` values or nothing (a leaf without
/// honest samples, or a split node).
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PredictionValues {
    values: Vec<Vec<f64>>,
    num_types: usize,
}

impl PredictionValues {
    /// Wrap per-node values of width `num_types`.
    #[must_use]
    pub fn new(values: Vec<Vec<f64>>, num_types: usize) -> Self {
        Self { values, num_types }
    }

    /// Return value `value_type` of `node`.
    #[must_use]
    pub fn get(&self, node: usize, value_type: usize) -> f64 {
        self.values[node][value_type]
    }

    /// Return all values of `node` (empty when the node has none).
    #[must_use]
    pub fn get_values(&self, node: usize) -> &[f64] {
        self.values.get(node).map_or(&[], Vec::as_slice)
    }

    /// Whether `node` carries no statistics.
    #[must_use]
    pub fn empty(&self, node: usize) -> bool {
        self.values.get(node).is_none_or(Vec::is_empty)
    }

    /// Return the number of nodes covered.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.values.len()
    }

    /// Return the number of values per non-empty node.
    #[must_use]
    pub fn num_types(&self) -> usize {
        self.num_types
    }
}

/// Estimates for one test sample.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Prediction {
    predictions: Vec<f64>,
    variance_estimates: Vec<f64>,
    error_estimates: Vec<f64>,
    excess_error_estimates: Vec<f64>,
}

impl Prediction {
    pub(crate) fn new(
        predictions: Vec<f64>,
        variance_estimates: Vec<f64>,
        error_estimates: Vec<f64>,
        excess_error_estimates: Vec<f64>,
    ) -> Self {
        Self {
            predictions,
            variance_estimates,
            error_estimates,
            excess_error_estimates,
        }
    }

    /// Return the point estimates.
    #[must_use]
    pub fn predictions(&self) -> &[f64] {
        &self.predictions
    }

    /// Return the variance estimates (empty unless requested).
    #[must_use]
    pub fn variance_estimates(&self) -> &[f64] {
        &self.variance_estimates
    }

    /// Return the debiased error estimates (out-of-bag only).
    #[must_use]
    pub fn error_estimates(&self) -> &[f64] {
        &self.error_estimates
    }

    /// Return the Monte Carlo excess error estimates (out-of-bag only).
    #[must_use]
    pub fn excess_error_estimates(&self) -> &[f64] {
        &self.excess_error_estimates
    }

    /// Whether variance estimates are present.
    #[must_use]
    pub fn contains_variance_estimates(&self) -> bool {
        !self.variance_estimates.is_empty()
    }

    /// Whether error estimates are present.
    #[must_use]
    pub fn contains_error_estimates(&self) -> bool {
        !self.error_estimates.is_empty()
    }

    /// Return the number of point estimates.
    #[must_use]
    pub fn size(&self) -> usize {
        self.predictions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_nodes_are_reported() {
        let values = PredictionValues::new(vec![vec![], vec![1.0, 2.0]], 2);
        assert!(values.empty(0));
        assert!(!values.empty(1));
        assert!(values.empty(5));
        assert_eq!(values.get(1, 1), 2.0);
        assert_eq!(values.num_nodes(), 2);
    }

    #[test]
    fn prediction_flags_optional_parts() {
        let prediction = Prediction::new(vec![1.0], vec![0.5], vec![], vec![]);
        assert_eq!(prediction.size(), 1);
        assert!(prediction.contains_variance_estimates());
        assert!(!prediction.contains_error_estimates());
    }
}
