//! CSV table reader with full input validation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::IoError;
use crate::table::Table;

/// Cell contents read as a missing value.
const MISSING_MARKERS: [&str; 3] = ["", "NA", "NaN"];

/// Reads a numeric table from a CSV file.
///
/// Expected CSV format:
/// - Header row required, one name per column
/// - `x1,x2,...,y`
/// - One row per sample, all rows must have the same number of columns
/// - Empty, `NA` and `NaN` cells are missing values
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Malformed CSV record |
/// | [`IoError::NoColumns`] | Header is empty |
/// | [`IoError::DuplicateColumn`] | Same column name appears twice |
/// | [`IoError::EmptyDataset`] | Zero data rows after header |
/// | [`IoError::InconsistentRowLength`] | Row has different column count than header |
/// | [`IoError::InvalidValue`] | Cell is not a number or missing marker |
pub struct TableReader {
    path: PathBuf,
}

impl TableReader {
    /// Create a new reader for the given CSV file path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// Read and validate the CSV file, returning a [`Table`].
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<Table, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible so that short rows surface as InconsistentRowLength
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let header = rdr.headers().map_err(|e| self.csv_error(e))?;
        let column_names: Vec<String> = header.iter().map(String::from).collect();
        let num_cols = column_names.len();
        if num_cols == 0 || (num_cols == 1 && column_names[0].is_empty()) {
            return Err(IoError::NoColumns {
                path: self.path.clone(),
            });
        }
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, name) in column_names.iter().enumerate() {
            if let Some(&first) = seen.get(name.as_str()) {
                return Err(IoError::DuplicateColumn {
                    path: self.path.clone(),
                    name: name.clone(),
                    first,
                    second: index,
                });
            }
            seen.insert(name, index);
        }
        debug!(num_cols, "read CSV header");

        let mut values = Vec::new();
        let mut num_rows = 0;
        let mut num_missing = 0usize;
        for (row_index, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| self.csv_error(e))?;
            if record.len() != num_cols {
                return Err(IoError::InconsistentRowLength {
                    path: self.path.clone(),
                    row_index,
                    expected: num_cols,
                    got: record.len(),
                });
            }
            for (col_index, raw) in record.iter().enumerate() {
                if MISSING_MARKERS.contains(&raw) {
                    values.push(f64::NAN);
                    num_missing += 1;
                    continue;
                }
                let value: f64 = raw.parse().map_err(|_| IoError::InvalidValue {
                    path: self.path.clone(),
                    row_index,
                    column: column_names[col_index].clone(),
                    raw: raw.to_string(),
                })?;
                values.push(value);
            }
            num_rows += 1;
        }

        if num_rows == 0 {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
            });
        }

        info!(num_rows, num_cols, num_missing, "table loaded");
        Ok(Table::new(column_names, values, num_rows, num_cols))
    }

    fn csv_error(&self, e: csv::Error) -> IoError {
        IoError::CsvParse {
            path: self.path.clone(),
            offset: e.position().map_or(0, |p| p.byte()),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn read_valid_table() {
        let f = write_csv("x,w,y\n0.5,1,2.5\n0.25,0,-1\n");
        let table = TableReader::new(f.path()).read().unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.num_cols(), 3);
        assert_eq!(table.column_names(), &["x", "w", "y"]);
        assert_eq!(table.values(), &[0.5, 1.0, 2.5, 0.25, 0.0, -1.0]);
    }

    #[test]
    fn missing_markers_become_nan() {
        let f = write_csv("a,b,c\n1,,NA\nNaN,2,3\n");
        let table = TableReader::new(f.path()).read().unwrap();
        assert!(table.get(0, 1).is_nan());
        assert!(table.get(0, 2).is_nan());
        assert!(table.get(1, 0).is_nan());
        assert_eq!(table.get(1, 2), 3.0);
    }

    #[test]
    fn invalid_value_error() {
        let f = write_csv("a,b\n1,abc\n");
        let err = TableReader::new(f.path()).read().unwrap_err();
        match err {
            IoError::InvalidValue {
                row_index,
                column,
                raw,
                ..
            } => {
                assert_eq!(row_index, 0);
                assert_eq!(column, "b");
                assert_eq!(raw, "abc");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_dataset_error() {
        let f = write_csv("a,b\n");
        let err = TableReader::new(f.path()).read().unwrap_err();
        assert!(matches!(err, IoError::EmptyDataset { .. }));
    }

    #[test]
    fn inconsistent_row_length_error() {
        let f = write_csv("a,b,c\n1,2,3\n4,5\n");
        let err = TableReader::new(f.path()).read().unwrap_err();
        assert!(matches!(
            err,
            IoError::InconsistentRowLength {
                row_index: 1,
                expected: 3,
                got: 2,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_column_error() {
        let f = write_csv("a,b,a\n1,2,3\n");
        let err = TableReader::new(f.path()).read().unwrap_err();
        assert!(matches!(
            err,
            IoError::DuplicateColumn {
                first: 0,
                second: 2,
                ..
            }
        ));
    }

    #[test]
    fn file_not_found_error() {
        let err = TableReader::new(Path::new("/nonexistent/table.csv"))
            .read()
            .unwrap_err();
        assert!(matches!(err, IoError::FileNotFound { .. }));
    }
}
