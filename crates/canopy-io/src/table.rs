//! Row-major numeric table with named columns.

use crate::IoError;

/// A numeric table read from disk.
///
/// Values are row-major: cell `(row, col)` is `values[row * num_cols + col]`.
/// Missing cells are `NaN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    column_names: Vec<String>,
    values: Vec<f64>,
    num_rows: usize,
    num_cols: usize,
}

impl Table {
    pub(crate) fn new(
        column_names: Vec<String>,
        values: Vec<f64>,
        num_rows: usize,
        num_cols: usize,
    ) -> Self {
        debug_assert_eq!(values.len(), num_rows * num_cols);
        Self {
            column_names,
            values,
            num_rows,
            num_cols,
        }
    }

    /// Return the column names in file order.
    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Return the row-major values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Consume the table, returning its row-major values.
    #[must_use]
    pub fn into_values(self) -> Vec<f64> {
        self.values
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

    /// Return the value at `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.num_cols + col]
    }

    /// Look up a column by name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::UnknownColumn`] if no column has that name.
    pub fn column_index(&self, name: &str) -> Result<usize, IoError> {
        self.column_names
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| IoError::UnknownColumn {
                name: name.to_string(),
            })
    }

    /// Remove a column and return its values, one per row.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::UnknownColumn`] if no column has that name.
    pub fn take_column(&mut self, name: &str) -> Result<Vec<f64>, IoError> {
        let index = self.column_index(name)?;
        let taken: Vec<f64> = (0..self.num_rows).map(|row| self.get(row, index)).collect();

        let num_cols = self.num_cols;
        let mut col = 0;
        self.values.retain(|_| {
            let keep = col % num_cols != index;
            col += 1;
            keep
        });
        self.column_names.remove(index);
        self.num_cols -= 1;
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            2,
            3,
        )
    }

    #[test]
    fn column_lookup() {
        let t = table();
        assert_eq!(t.column_index("b").unwrap(), 1);
        assert!(matches!(
            t.column_index("z"),
            Err(IoError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn take_column_removes_it() {
        let mut t = table();
        assert_eq!(t.take_column("b").unwrap(), vec![2.0, 5.0]);
        assert_eq!(t.num_cols(), 2);
        assert_eq!(t.column_names(), &["a", "c"]);
        assert_eq!(t.values(), &[1.0, 3.0, 4.0, 6.0]);
        assert_eq!(t.column_index("c").unwrap(), 1);
    }
}
