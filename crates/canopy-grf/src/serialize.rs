//! Forest persistence via bincode.

use std::path::Path;

use tracing::{debug, info, instrument};

use crate::error::ForestError;
use crate::forest::Forest;

/// Current binary format version.
const FORMAT_VERSION: u32 = 1;

/// Leading field of every forest file. Decoded on its own first so a
/// version mismatch is reported even when the rest of the layout changed.
#[derive(serde::Deserialize)]
struct EnvelopeHeader {
    format_version: u32,
}

#[derive(serde::Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    num_trees: usize,
    num_variables: usize,
    ci_group_size: usize,
    forest: &'a Forest,
}

#[derive(serde::Deserialize)]
struct Envelope {
    format_version: u32,
    num_trees: usize,
    num_variables: usize,
    ci_group_size: usize,
    forest: Forest,
}

impl Forest {
    /// Save the forest to a binary file.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::SerializeForest`] | bincode encoding failed |
    /// | [`ForestError::WriteForest`] | file write failed |
    #[instrument(skip(self), fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ForestError> {
        let path = path.as_ref();
        let envelope = EnvelopeRef {
            format_version: FORMAT_VERSION,
            num_trees: self.trees.len(),
            num_variables: self.num_variables,
            ci_group_size: self.ci_group_size,
            forest: self,
        };
        let bytes = bincode::serialize(&envelope)
            .map_err(|e| ForestError::SerializeForest { source: e })?;
        std::fs::write(path, &bytes).map_err(|e| ForestError::WriteForest {
            path: path.to_path_buf(),
            source: e,
        })?;

        info!(
            size_bytes = bytes.len(),
            num_trees = self.trees.len(),
            "forest saved"
        );
        Ok(())
    }

    /// Load a forest saved by [`Forest::save`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::ReadForest`] | file read failed |
    /// | [`ForestError::IncompatibleForestVersion`] | format version mismatch |
    /// | [`ForestError::DeserializeForest`] | bincode decoding failed |
    #[instrument(fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ForestError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| ForestError::ReadForest {
            path: path.to_path_buf(),
            source: e,
        })?;
        let deserialize_error = |e| ForestError::DeserializeForest {
            path: path.to_path_buf(),
            source: e,
        };

        let header: EnvelopeHeader = bincode::deserialize(&bytes).map_err(deserialize_error)?;
        if header.format_version != FORMAT_VERSION {
            return Err(ForestError::IncompatibleForestVersion {
                path: path.to_path_buf(),
                expected: FORMAT_VERSION,
                found: header.format_version,
            });
        }
        let envelope: Envelope = bincode::deserialize(&bytes).map_err(deserialize_error)?;

        debug!(
            format_version = envelope.format_version,
            num_trees = envelope.num_trees,
            num_variables = envelope.num_variables,
            ci_group_size = envelope.ci_group_size,
            "forest loaded"
        );
        Ok(envelope.forest)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::data::Data;
    use crate::forest_options::ForestOptions;
    use crate::forest_trainer::regression_trainer;

    fn train_small_forest() -> Forest {
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|i| {
                let x = i as f64;
                vec![x, (i % 3) as f64, if i < 20 { 1.0 } else { 5.0 }]
            })
            .collect();
        let data = Data::from_rows(&rows).unwrap().with_outcome_index(2).unwrap();
        let options = ForestOptions::new(4)
            .unwrap()
            .with_num_threads(1)
            .with_min_node_size(2);
        regression_trainer().train(&data, &options).unwrap()
    }

    #[test]
    fn saved_forest_loads_unchanged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forest.bin");
        let forest = train_small_forest();
        forest.save(&path).unwrap();
        let loaded = Forest::load(&path).unwrap();
        assert_eq!(loaded, forest);
    }

    #[test]
    fn load_nonexistent_file_error() {
        let dir = TempDir::new().unwrap();
        let err = Forest::load(dir.path().join("missing.bin")).unwrap_err();
        assert!(matches!(err, ForestError::ReadForest { .. }));
    }

    #[test]
    fn load_corrupt_file_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corrupt.bin");
        std::fs::write(&path, FORMAT_VERSION.to_le_bytes()).unwrap();
        let err = Forest::load(&path).unwrap_err();
        assert!(matches!(err, ForestError::DeserializeForest { .. }));
    }

    #[test]
    fn other_versions_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.bin");
        let mut bytes = bincode::serialize(&99u32).unwrap();
        bytes.extend_from_slice(&[0; 16]);
        std::fs::write(&path, bytes).unwrap();
        let err = Forest::load(&path).unwrap_err();
        assert!(matches!(
            err,
            ForestError::IncompatibleForestVersion {
                expected: 1,
                found: 99,
                ..
            }
        ));
    }
}
