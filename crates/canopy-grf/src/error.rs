use std::path::PathBuf;

use crate::data::DataRole;

/// Errors from forest configuration, training, prediction and persistence.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when num_trees is zero.
    #[error("num_trees must be at least 1, got {num_trees}")]
    InvalidTreeCount {
        /// The invalid num_trees value provided.
        num_trees: usize,
    },

    /// Returned when ci_group_size is zero.
    #[error("ci_group_size must be at least 1, got {ci_group_size}")]
    InvalidCiGroupSize {
        /// The invalid ci_group_size value provided.
        ci_group_size: usize,
    },

    /// Returned when sample_fraction is not in (0.0, 1.0].
    #[error("sample_fraction must be in (0.0, 1.0], got {fraction}")]
    InvalidSampleFraction {
        /// The invalid sample_fraction value provided.
        fraction: f64,
    },

    /// Returned when CI groups ask for more than half the data per tree.
    #[error(
        "sample_fraction must be at most 0.5 when ci_group_size > 1, got sample_fraction {fraction} with ci_group_size {ci_group_size}"
    )]
    CiGroupSampleFraction {
        /// The configured sample_fraction.
        fraction: f64,
        /// The configured ci_group_size.
        ci_group_size: usize,
    },

    /// Returned when the sample fraction draws no rows at all.
    #[error("sample_fraction {fraction} of {num_rows} rows selects no samples")]
    SampleFractionTooSmall {
        /// The configured sample_fraction.
        fraction: f64,
        /// Number of rows in the training data.
        num_rows: usize,
    },

    /// Returned when honesty leaves either half of a tree's sample empty.
    #[error(
        "honesty_fraction {honesty_fraction} with sample_fraction {sample_fraction} leaves an empty half for {num_rows} rows"
    )]
    HonestyFractionDegenerate {
        /// The configured honesty_fraction.
        honesty_fraction: f64,
        /// The configured sample_fraction.
        sample_fraction: f64,
        /// Number of rows in the training data.
        num_rows: usize,
    },

    /// Returned when honesty_fraction is not in (0.0, 1.0).
    #[error("honesty_fraction must be in (0.0, 1.0), got {fraction}")]
    InvalidHonestyFraction {
        /// The invalid honesty_fraction value provided.
        fraction: f64,
    },

    /// Returned when alpha is not in [0.0, 0.25).
    #[error("alpha must be in [0.0, 0.25), got {alpha}")]
    InvalidAlpha {
        /// The invalid alpha value provided.
        alpha: f64,
    },

    /// Returned when imbalance_penalty is negative or not finite.
    #[error("imbalance_penalty must be a non-negative number, got {penalty}")]
    InvalidImbalancePenalty {
        /// The invalid penalty value provided.
        penalty: f64,
    },

    /// Returned when the cluster assignment does not cover every row.
    #[error("cluster assignment has {got} entries, expected one per row ({expected})")]
    ClusterCountMismatch {
        /// Number of rows in the training data.
        expected: usize,
        /// Number of cluster labels provided.
        got: usize,
    },

    /// Returned when a data table has zero rows.
    #[error("data table has zero rows")]
    EmptyData,

    /// Returned when a data table has zero columns.
    #[error("data table has zero columns")]
    ZeroColumns,

    /// Returned when the flat value buffer does not match the declared shape.
    #[error("expected {expected} values for the declared shape, got {got}")]
    ValueCountMismatch {
        /// `num_rows * num_cols`.
        expected: usize,
        /// Length of the provided buffer.
        got: usize,
    },

    /// Returned when a row has a different number of columns than the first row.
    #[error("row {row_index} has {got} columns, expected {expected}")]
    InconsistentRowLength {
        /// Zero-based index of the offending row.
        row_index: usize,
        /// Expected number of columns.
        expected: usize,
        /// Actual number of columns.
        got: usize,
    },

    /// Returned when a role is assigned to a column that does not exist.
    #[error("{role} column {column} is out of range for a table with {num_cols} columns")]
    ColumnOutOfRange {
        /// The role being assigned.
        role: DataRole,
        /// The requested column.
        column: usize,
        /// Number of columns in the table.
        num_cols: usize,
    },

    /// Returned when a trainer or predictor needs a column role the data does not define.
    #[error("data has no {role} column")]
    MissingDataRole {
        /// The role that is required.
        role: DataRole,
    },

    /// Returned when a classification outcome is not an integer label in range.
    #[error("row {row} has class label {value}, expected an integer in [0, {num_classes})")]
    InvalidClassLabel {
        /// Zero-based row index.
        row: usize,
        /// The offending outcome value.
        value: f64,
        /// Number of classes.
        num_classes: usize,
    },

    /// Returned when a quantile is not strictly inside (0, 1).
    #[error("quantiles must lie in (0.0, 1.0), got {quantile}")]
    InvalidQuantile {
        /// The invalid quantile.
        quantile: f64,
    },

    /// Returned when an empty quantile list is supplied.
    #[error("at least one quantile is required")]
    EmptyQuantiles,

    /// Returned when fewer than two classes are requested.
    #[error("num_classes must be at least 2, got {num_classes}")]
    InvalidNumClasses {
        /// The invalid class count.
        num_classes: usize,
    },

    /// Returned when gradient weights do not have one entry per (outcome, treatment) pair.
    #[error("expected {expected} gradient weights, got {got}")]
    GradientWeightsLength {
        /// `num_outcomes * num_treatments`.
        expected: usize,
        /// Number of weights supplied.
        got: usize,
    },

    /// Returned when reduced_form_weight is outside [0.0, 1.0].
    #[error("reduced_form_weight must be in [0.0, 1.0], got {weight}")]
    InvalidReducedFormWeight {
        /// The invalid weight.
        weight: f64,
    },

    /// Returned when local linear prediction receives no lambdas.
    #[error("at least one ridge lambda is required")]
    EmptyLambdas,

    /// Returned when merging an empty list of forests.
    #[error("cannot merge an empty list of forests")]
    EmptyMerge,

    /// Returned when merged forests disagree on ci_group_size.
    #[error("forest {index} has ci_group_size {found}, expected {expected}")]
    CiGroupSizeMismatch {
        /// Position of the offending forest in the merge list.
        index: usize,
        /// ci_group_size of the first forest.
        expected: usize,
        /// ci_group_size of the offending forest.
        found: usize,
    },

    /// Returned when merged forests were trained on tables of different widths.
    #[error("forest {index} was trained on {found} variables, expected {expected}")]
    NumVariablesMismatch {
        /// Position of the offending forest in the merge list.
        index: usize,
        /// num_variables of the first forest.
        expected: usize,
        /// num_variables of the offending forest.
        found: usize,
    },

    /// Returned when variance estimates are requested from a forest without CI groups.
    #[error("variance estimates require ci_group_size > 1, forest has {ci_group_size}")]
    VarianceRequiresCiGroups {
        /// ci_group_size of the forest.
        ci_group_size: usize,
    },

    /// Returned when prediction data lacks a column the forest splits on.
    #[error("forest splits on column {required}, prediction data has {got} columns")]
    PredictionColumnMismatch {
        /// Highest column index used by any split, plus one.
        required: usize,
        /// Number of columns in the prediction data.
        got: usize,
    },

    /// Returned when the training data given to a predictor is shorter than
    /// the table the forest was trained on.
    #[error("forest was trained on {required} rows, training data has {got}")]
    TrainingRowMismatch {
        /// Highest training row drawn by any tree, plus one.
        required: usize,
        /// Number of rows in the training data passed for prediction.
        got: usize,
    },

    /// Returned when a prediction strategy produces an estimate of the wrong length.
    #[error("prediction for sample {sample} has length {got}, expected {expected}")]
    PredictionLengthMismatch {
        /// Zero-based index of the test sample.
        sample: usize,
        /// Length declared by the prediction strategy.
        expected: usize,
        /// Length actually produced.
        got: usize,
    },

    /// Returned when the worker pool cannot be created.
    #[error("failed to build thread pool")]
    ThreadPool {
        /// Underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// Returned when bincode encoding fails.
    #[error("failed to serialize forest")]
    SerializeForest {
        /// Underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when bincode decoding fails.
    #[error("failed to deserialize forest from {path}")]
    DeserializeForest {
        /// Path to the forest file.
        path: PathBuf,
        /// Underlying bincode error.
        source: Box<bincode::ErrorKind>,
    },

    /// Returned when the forest file cannot be written.
    #[error("failed to write forest to {path}")]
    WriteForest {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the forest file cannot be read.
    #[error("failed to read forest from {path}")]
    ReadForest {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the forest file has an incompatible format version.
    #[error("incompatible forest format version in {path}: expected {expected}, found {found}")]
    IncompatibleForestVersion {
        /// Path to the forest file.
        path: PathBuf,
        /// Expected format version.
        expected: u32,
        /// Format version found in the file.
        found: u32,
    },
}
