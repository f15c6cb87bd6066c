//! Row-major numeric table with column roles.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ForestError;

/// A column role a trainer or predictor may depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataRole {
    /// Response column(s).
    Outcome,
    /// Treatment column(s).
    Treatment,
    /// Instrument column.
    Instrument,
    /// Per-sample weight column.
    Weight,
    /// Censoring indicator (positive means the event was observed).
    Censor,
    /// Precomputed numerator of the causal survival estimating equation.
    CausalSurvivalNumerator,
    /// Precomputed denominator of the causal survival estimating equation.
    CausalSurvivalDenominator,
}

impl fmt::Display for DataRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataRole::Outcome => "outcome",
            DataRole::Treatment => "treatment",
            DataRole::Instrument => "instrument",
            DataRole::Weight => "weight",
            DataRole::Censor => "censor",
            DataRole::CausalSurvivalNumerator => "causal survival numerator",
            DataRole::CausalSurvivalDenominator => "causal survival denominator",
        };
        f.write_str(name)
    }
}

/// NaN-first ordering used for every split-value sort.
pub(crate) fn nan_first_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// An immutable numeric table.
///
/// Values are stored row-major. `NaN` marks a missing cell. Columns that are
/// assigned a role (outcome, treatment, ...) are never used as split
/// variables.
#[derive(Debug, Clone)]
pub struct Data {
    values: Vec<f64>,
    num_rows: usize,
    num_cols: usize,
    outcome_indices: Vec<usize>,
    treatment_indices: Vec<usize>,
    instrument_index: Option<usize>,
    weight_index: Option<usize>,
    censor_index: Option<usize>,
    numerator_index: Option<usize>,
    denominator_index: Option<usize>,
    disallowed_split_variables: BTreeSet<usize>,
    max_num_unique_values: usize,
}

impl Data {
    /// Build a table from a row-major value buffer.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyData`] | `num_rows` is zero |
    /// | [`ForestError::ZeroColumns`] | `num_cols` is zero |
    /// | [`ForestError::ValueCountMismatch`] | `values.len() != num_rows * num_cols` |
    pub fn new(values: Vec<f64>, num_rows: usize, num_cols: usize) -> Result<Self, ForestError> {
        if num_rows == 0 {
            return Err(ForestError::EmptyData);
        }
        if num_cols == 0 {
            return Err(ForestError::ZeroColumns);
        }
        if values.len() != num_rows * num_cols {
            return Err(ForestError::ValueCountMismatch {
                expected: num_rows * num_cols,
                got: values.len(),
            });
        }

        let max_num_unique_values = (0..num_cols)
            .map(|col| {
                let mut column: Vec<f64> =
                    (0..num_rows).map(|row| values[row * num_cols + col]).collect();
                column.sort_by(|a, b| nan_first_cmp(*a, *b));
                column.dedup_by(|a, b| same_value(*a, *b));
                column.len()
            })
            .max()
            .unwrap_or(0);

        Ok(Self {
            values,
            num_rows,
            num_cols,
            outcome_indices: Vec::new(),
            treatment_indices: Vec::new(),
            instrument_index: None,
            weight_index: None,
            censor_index: None,
            numerator_index: None,
            denominator_index: None,
            disallowed_split_variables: BTreeSet::new(),
            max_num_unique_values,
        })
    }

    /// Build a table from a list of rows.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyData`] | `rows` is empty |
    /// | [`ForestError::ZeroColumns`] | the first row is empty |
    /// | [`ForestError::InconsistentRowLength`] | rows differ in length |
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ForestError> {
        let first = rows.first().ok_or(ForestError::EmptyData)?;
        let num_cols = first.len();
        let mut values = Vec::with_capacity(rows.len() * num_cols);
        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != num_cols {
                return Err(ForestError::InconsistentRowLength {
                    row_index,
                    expected: num_cols,
                    got: row.len(),
                });
            }
            values.extend_from_slice(row);
        }
        Self::new(values, rows.len(), num_cols)
    }

    // --- Role setters ---

    /// Use a single column as the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_outcome_index(self, column: usize) -> Result<Self, ForestError> {
        self.with_outcome_indices(&[column])
    }

    /// Use several columns as a vector outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if any column does not exist.
    pub fn with_outcome_indices(mut self, columns: &[usize]) -> Result<Self, ForestError> {
        for &column in columns {
            self.check_column(DataRole::Outcome, column)?;
        }
        self.outcome_indices = columns.to_vec();
        self.refresh_disallowed();
        Ok(self)
    }

    /// Use a single column as the treatment.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_treatment_index(self, column: usize) -> Result<Self, ForestError> {
        self.with_treatment_indices(&[column])
    }

    /// Use several columns as a vector treatment.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if any column does not exist.
    pub fn with_treatment_indices(mut self, columns: &[usize]) -> Result<Self, ForestError> {
        for &column in columns {
            self.check_column(DataRole::Treatment, column)?;
        }
        self.treatment_indices = columns.to_vec();
        self.refresh_disallowed();
        Ok(self)
    }

    /// Use a column as the instrument.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_instrument_index(mut self, column: usize) -> Result<Self, ForestError> {
        self.check_column(DataRole::Instrument, column)?;
        self.instrument_index = Some(column);
        self.refresh_disallowed();
        Ok(self)
    }

    /// Use a column as per-sample weights.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_weight_index(mut self, column: usize) -> Result<Self, ForestError> {
        self.check_column(DataRole::Weight, column)?;
        self.weight_index = Some(column);
        self.refresh_disallowed();
        Ok(self)
    }

    /// Use a column as the censoring indicator.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_censor_index(mut self, column: usize) -> Result<Self, ForestError> {
        self.check_column(DataRole::Censor, column)?;
        self.censor_index = Some(column);
        self.refresh_disallowed();
        Ok(self)
    }

    /// Use a column as the causal survival numerator.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_causal_survival_numerator_index(
        mut self,
        column: usize,
    ) -> Result<Self, ForestError> {
        self.check_column(DataRole::CausalSurvivalNumerator, column)?;
        self.numerator_index = Some(column);
        self.refresh_disallowed();
        Ok(self)
    }

    /// Use a column as the causal survival denominator.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ColumnOutOfRange`] if the column does not exist.
    pub fn with_causal_survival_denominator_index(
        mut self,
        column: usize,
    ) -> Result<Self, ForestError> {
        self.check_column(DataRole::CausalSurvivalDenominator, column)?;
        self.denominator_index = Some(column);
        self.refresh_disallowed();
        Ok(self)
    }

    fn check_column(&self, role: DataRole, column: usize) -> Result<(), ForestError> {
        if column >= self.num_cols {
            return Err(ForestError::ColumnOutOfRange {
                role,
                column,
                num_cols: self.num_cols,
            });
        }
        Ok(())
    }

    fn refresh_disallowed(&mut self) {
        self.disallowed_split_variables = self
            .outcome_indices
            .iter()
            .chain(&self.treatment_indices)
            .copied()
            .chain(self.instrument_index)
            .chain(self.weight_index)
            .chain(self.censor_index)
            .chain(self.numerator_index)
            .chain(self.denominator_index)
            .collect();
    }

    // --- Getters ---

    /// Return the value at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.num_cols + col]
    }

    /// Return one full row.
    #[must_use]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.num_cols..(row + 1) * self.num_cols]
    }

    /// Return the number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Return the number of columns.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Return the first outcome of a row, or NaN when no outcome is set.
    #[must_use]
    pub fn get_outcome(&self, row: usize) -> f64 {
        self.outcome_indices
            .first()
            .map_or(f64::NAN, |&col| self.get(row, col))
    }

    /// Return every outcome of a row.
    #[must_use]
    pub fn get_outcomes(&self, row: usize) -> Vec<f64> {
        self.outcome_indices
            .iter()
            .map(|&col| self.get(row, col))
            .collect()
    }

    /// Return the first treatment of a row, or NaN when no treatment is set.
    #[must_use]
    pub fn get_treatment(&self, row: usize) -> f64 {
        self.treatment_indices
            .first()
            .map_or(f64::NAN, |&col| self.get(row, col))
    }

    /// Return every treatment of a row.
    #[must_use]
    pub fn get_treatments(&self, row: usize) -> Vec<f64> {
        self.treatment_indices
            .iter()
            .map(|&col| self.get(row, col))
            .collect()
    }

    /// Return treatment `treatment` of a row, or NaN when it does not exist.
    #[must_use]
    pub fn get_treatment_at(&self, row: usize, treatment: usize) -> f64 {
        self.treatment_indices
            .get(treatment)
            .map_or(f64::NAN, |&col| self.get(row, col))
    }

    /// Return the instrument of a row, or NaN when no instrument is set.
    #[must_use]
    pub fn get_instrument(&self, row: usize) -> f64 {
        self.instrument_index
            .map_or(f64::NAN, |col| self.get(row, col))
    }

    /// Return the sample weight of a row; 1.0 without a weight column.
    #[must_use]
    pub fn get_weight(&self, row: usize) -> f64 {
        self.weight_index.map_or(1.0, |col| self.get(row, col))
    }

    /// Whether the event of a row was observed. Without a censor column
    /// every event counts as observed.
    #[must_use]
    pub fn is_failure(&self, row: usize) -> bool {
        self.censor_index.is_none_or(|col| self.get(row, col) > 0.0)
    }

    /// Return the causal survival numerator of a row, or NaN when unset.
    #[must_use]
    pub fn get_causal_survival_numerator(&self, row: usize) -> f64 {
        self.numerator_index
            .map_or(f64::NAN, |col| self.get(row, col))
    }

    /// Return the causal survival denominator of a row, or NaN when unset.
    #[must_use]
    pub fn get_causal_survival_denominator(&self, row: usize) -> f64 {
        self.denominator_index
            .map_or(f64::NAN, |col| self.get(row, col))
    }

    /// Return the number of outcome columns (at least 1).
    #[must_use]
    pub fn num_outcomes(&self) -> usize {
        self.outcome_indices.len().max(1)
    }

    /// Return the number of treatment columns (at least 1).
    #[must_use]
    pub fn num_treatments(&self) -> usize {
        self.treatment_indices.len().max(1)
    }

    /// Return the columns that are never split on.
    #[must_use]
    pub fn disallowed_split_variables(&self) -> &BTreeSet<usize> {
        &self.disallowed_split_variables
    }

    /// Return the largest number of distinct values in any column.
    #[must_use]
    pub fn max_num_unique_values(&self) -> usize {
        self.max_num_unique_values
    }

    /// Whether the column role is assigned.
    #[must_use]
    pub fn has_role(&self, role: DataRole) -> bool {
        match role {
            DataRole::Outcome => !self.outcome_indices.is_empty(),
            DataRole::Treatment => !self.treatment_indices.is_empty(),
            DataRole::Instrument => self.instrument_index.is_some(),
            DataRole::Weight => self.weight_index.is_some(),
            DataRole::Censor => self.censor_index.is_some(),
            DataRole::CausalSurvivalNumerator => self.numerator_index.is_some(),
            DataRole::CausalSurvivalDenominator => self.denominator_index.is_some(),
        }
    }

    /// Return the distinct values of `var` over `samples`, sorted ascending
    /// with NaN first, together with the samples stably sorted the same way.
    ///
    /// All NaNs collapse to a single distinct value.
    #[must_use]
    pub fn get_all_values(&self, samples: &[usize], var: usize) -> (Vec<f64>, Vec<usize>) {
        let mut sorted_samples = samples.to_vec();
        sorted_samples.sort_by(|&a, &b| nan_first_cmp(self.get(a, var), self.get(b, var)));

        let mut values: Vec<f64> = sorted_samples.iter().map(|&s| self.get(s, var)).collect();
        values.dedup_by(|a, b| same_value(*a, *b));
        (values, sorted_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Data {
        Data::from_rows(&[
            vec![3.0, 1.0, 0.5],
            vec![f64::NAN, 2.0, 1.5],
            vec![1.0, 2.0, 2.5],
            vec![3.0, f64::NAN, 3.5],
            vec![f64::NAN, 1.0, 4.5],
        ])
        .unwrap()
    }

    #[test]
    fn get_all_values_puts_nan_first() {
        let data = table();
        let (values, samples) = data.get_all_values(&[0, 1, 2, 3, 4], 0);
        assert_eq!(values.len(), 3);
        assert!(values[0].is_nan());
        assert_eq!(&values[1..], &[1.0, 3.0]);
        assert_eq!(samples, vec![1, 4, 2, 0, 3]);
    }

    #[test]
    fn get_all_values_respects_subset() {
        let data = table();
        let (values, samples) = data.get_all_values(&[2, 0], 0);
        assert_eq!(values, vec![1.0, 3.0]);
        assert_eq!(samples, vec![2, 0]);
    }

    #[test]
    fn max_unique_counts_nan_once() {
        let data = table();
        // column 2 has five distinct values
        assert_eq!(data.max_num_unique_values(), 5);
    }

    #[test]
    fn roles_are_disallowed_for_splitting() {
        let data = table()
            .with_outcome_index(2)
            .unwrap()
            .with_treatment_index(1)
            .unwrap();
        let disallowed: Vec<usize> = data.disallowed_split_variables().iter().copied().collect();
        assert_eq!(disallowed, vec![1, 2]);
        assert!(data.has_role(DataRole::Outcome));
        assert!(!data.has_role(DataRole::Instrument));
        assert_eq!(data.get_outcome(0), 0.5);
        assert_eq!(data.get_treatment(1), 2.0);
    }

    #[test]
    fn reassigning_role_replaces_disallowed_column() {
        let data = table()
            .with_outcome_index(2)
            .unwrap()
            .with_outcome_index(1)
            .unwrap();
        let disallowed: Vec<usize> = data.disallowed_split_variables().iter().copied().collect();
        assert_eq!(disallowed, vec![1]);
    }

    #[test]
    fn missing_roles_read_as_defaults() {
        let data = table();
        assert!(data.get_outcome(0).is_nan());
        assert!(data.get_instrument(0).is_nan());
        assert_eq!(data.get_weight(0), 1.0);
        assert!(data.is_failure(0));
        assert_eq!(data.num_outcomes(), 1);
    }

    #[test]
    fn out_of_range_role_is_rejected() {
        let err = table().with_weight_index(3).unwrap_err();
        assert!(matches!(
            err,
            ForestError::ColumnOutOfRange { role: DataRole::Weight, column: 3, num_cols: 3 }
        ));
    }

    #[test]
    fn inconsistent_rows_are_rejected() {
        let err = Data::from_rows(&[vec![1.0, 2.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, ForestError::InconsistentRowLength { row_index: 1, .. }));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let err = Data::new(vec![1.0; 5], 2, 3).unwrap_err();
        assert!(matches!(err, ForestError::ValueCountMismatch { expected: 6, got: 5 }));
    }
}
