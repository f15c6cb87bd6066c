//! A trained forest: trees plus the metadata prediction needs.

use crate::error::ForestError;
use crate::tree::Tree;

/// An immutable collection of trained trees.
///
/// Trees are stored in CI-group order: with `ci_group_size = g`, trees
/// `g*k .. g*k + g` were grown on the same half-sample.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Forest {
    pub(crate) trees: Vec<Tree>,
    pub(crate) num_variables: usize,
    pub(crate) ci_group_size: usize,
}

impl Forest {
    pub(crate) fn new(trees: Vec<Tree>, num_variables: usize, ci_group_size: usize) -> Self {
        Self {
            trees,
            num_variables,
            ci_group_size,
        }
    }

    /// Concatenate forests trained on the same data, in order.
    ///
    /// # Errors
    ///
    /// | Variant | When |
    /// |---|---|
    /// | [`ForestError::EmptyMerge`] | `forests` is empty |
    /// | [`ForestError::CiGroupSizeMismatch`] | two forests disagree on `ci_group_size` |
    /// | [`ForestError::NumVariablesMismatch`] | two forests disagree on `num_variables` |
    pub fn merge(forests: Vec<Forest>) -> Result<Forest, ForestError> {
        let Some(first) = forests.first() else {
            return Err(ForestError::EmptyMerge);
        };
        let ci_group_size = first.ci_group_size;
        let num_variables = first.num_variables;
        if let Some((index, forest)) = forests
            .iter()
            .enumerate()
            .find(|(_, forest)| forest.ci_group_size != ci_group_size)
        {
            return Err(ForestError::CiGroupSizeMismatch {
                index,
                expected: ci_group_size,
                found: forest.ci_group_size,
            });
        }
        if let Some((index, forest)) = forests
            .iter()
            .enumerate()
            .find(|(_, forest)| forest.num_variables != num_variables)
        {
            return Err(ForestError::NumVariablesMismatch {
                index,
                expected: num_variables,
                found: forest.num_variables,
            });
        }

        let trees = forests.into_iter().flat_map(|forest| forest.trees).collect();
        Ok(Forest::new(trees, num_variables, ci_group_size))
    }

    /// Return the trees.
    #[must_use]
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of columns of the training data.
    #[must_use]
    pub fn num_variables(&self) -> usize {
        self.num_variables
    }

    /// Return the number of trees per CI group.
    #[must_use]
    pub fn ci_group_size(&self) -> usize {
        self.ci_group_size
    }

    /// Highest split column plus one (0 for a forest of stumps).
    #[must_use]
    pub fn required_columns(&self) -> usize {
        self.trees
            .iter()
            .filter_map(Tree::max_split_variable)
            .max()
            .map_or(0, |var| var + 1)
    }

    /// Highest training row drawn by any tree, plus one.
    #[must_use]
    pub fn required_rows(&self) -> usize {
        self.trees
            .iter()
            .filter_map(|tree| tree.drawn_samples().iter().max())
            .max()
            .map_or(0, |&row| row + 1)
    }
}
