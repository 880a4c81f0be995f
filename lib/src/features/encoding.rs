//! Drop-first one-hot encoding for categorical patient fields.
//!
//! Each categorical column is expanded into one indicator column per observed
//! category, minus the first (lexicographically smallest) category, which
//! becomes the baseline contrast. Categories are fixed at fit time; values not
//! seen during fitting encode as the baseline (all indicators zero) and never
//! add columns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{NutriError, Result};

/// Unfitted drop-first one-hot encoder for a single named column.
#[derive(Clone, Debug)]
pub struct DropFirstOneHot {
    column: String,
}

impl DropFirstOneHot {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Learn the sorted category list from the observed values.
    ///
    /// Missing values (`None`) are not a category; they encode as the baseline.
    ///
    /// # Errors
    /// Returns [`NutriError::EmptyData`] if no value at all was observed.
    pub fn fit<I, S>(&self, values: I) -> Result<FittedDropFirstOneHot>
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let categories: BTreeSet<String> = values
            .into_iter()
            .flatten()
            .map(|s| s.as_ref().to_string())
            .collect();
        if categories.is_empty() {
            return Err(NutriError::EmptyData(format!(
                "no categories observed for column {}",
                self.column
            )));
        }
        Ok(FittedDropFirstOneHot {
            column: self.column.clone(),
            categories: categories.into_iter().collect(),
        })
    }
}

/// Outcome of encoding one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    /// One of the indicator columns is set (or none, for the baseline category).
    Known,
    /// Missing value; encoded as the baseline.
    Missing,
    /// Category never seen during fitting; encoded as the baseline.
    Unseen,
}

/// Fitted encoder: the training-time category list of one column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FittedDropFirstOneHot {
    column: String,
    /// All observed categories, sorted. The first one is the dropped baseline.
    categories: Vec<String>,
}

impl FittedDropFirstOneHot {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn baseline(&self) -> &str {
        &self.categories[0]
    }

    /// Number of indicator columns produced.
    pub fn n_features_out(&self) -> usize {
        self.categories.len() - 1
    }

    /// Indicator column names, `<column>_<category>`, baseline excluded.
    pub fn output_names(&self) -> Vec<String> {
        self.categories[1..]
            .iter()
            .map(|c| format!("{}_{}", self.column, c))
            .collect()
    }

    /// Write the indicators for `value` into `out` (length [`Self::n_features_out`]).
    pub fn encode_into(&self, value: Option<&str>, out: &mut [f64]) -> Encoded {
        debug_assert_eq!(out.len(), self.n_features_out());
        out.iter_mut().for_each(|v| *v = 0.0);
        let Some(value) = value else {
            return Encoded::Missing;
        };
        match self.categories.binary_search_by(|c| c.as_str().cmp(value)) {
            Ok(0) => Encoded::Known,
            Ok(idx) => {
                out[idx - 1] = 1.0;
                Encoded::Known
            }
            Err(_) => Encoded::Unseen,
        }
    }

    pub fn encode(&self, value: Option<&str>) -> (Vec<f64>, Encoded) {
        let mut out = vec![0.0; self.n_features_out()];
        let status = self.encode_into(value, &mut out);
        (out, status)
    }
}
