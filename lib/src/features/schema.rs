//! The ordered feature contract between training and serving.

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{NutriError, Result};

/// Canonical, ordered list of feature names a fitted model expects.
///
/// Fixed when the training matrix is built and persisted next to the model.
/// Every inference input is aligned to exactly this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    /// Create a schema, rejecting empty and duplicate names.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(NutriError::SchemaMissing(
                "a feature schema needs at least one feature".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.is_empty() {
                return Err(NutriError::InvalidParameter(
                    "feature names must be non-empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(NutriError::DuplicateFeature(name.clone()));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always `false`: construction rejects empty schemas.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Indices of features whose name starts with `prefix`.
    pub fn indices_with_prefix(&self, prefix: &str) -> Vec<usize> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }
}

/// One row of numeric values whose names and order are those of a schema.
///
/// The only ways to build one check the value count against the schema, so a
/// vector handed to a model always has the expected width.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    schema: Arc<FeatureSchema>,
    values: Array1<f64>,
}

impl FeatureVector {
    pub fn new(schema: Arc<FeatureSchema>, values: Vec<f64>) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(NutriError::FeatureMismatch {
                expected: schema.len(),
                got: values.len(),
            });
        }
        Ok(Self {
            schema,
            values: Array1::from(values),
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn values(&self) -> ArrayView1<'_, f64> {
        self.values.view()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema.position(name).map(|i| self.values[i])
    }

    /// The vector as a `(1, n_features)` matrix for batch-oriented models.
    pub fn to_row_matrix(&self) -> Array2<f64> {
        self.values.clone().insert_axis(ndarray::Axis(0))
    }

    /// `(name, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Feature matrix `(n_samples, n_features)` tagged with the schema of its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    schema: FeatureSchema,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(schema: FeatureSchema, values: Array2<f64>) -> Result<Self> {
        if values.ncols() != schema.len() {
            return Err(NutriError::FeatureMismatch {
                expected: schema.len(),
                got: values.ncols(),
            });
        }
        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn into_parts(self) -> (FeatureSchema, Array2<f64>) {
        (self.schema, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_rejects_duplicates_and_empty() {
        assert!(matches!(
            FeatureSchema::new(["Age", "BMI", "Age"]),
            Err(NutriError::DuplicateFeature(name)) if name == "Age"
        ));
        assert!(matches!(
            FeatureSchema::new(Vec::<String>::new()),
            Err(NutriError::SchemaMissing(_))
        ));
        assert!(FeatureSchema::new(["Age", ""]).is_err());
    }

    #[test]
    fn test_schema_positions() {
        let schema =
            FeatureSchema::new(["Age", "BMI", "Gender_Male", "Chronic_Disease_none"]).unwrap();
        assert_eq!(schema.position("BMI"), Some(1));
        assert_eq!(schema.position("Weight"), None);
        assert_eq!(schema.indices_with_prefix("Gender_"), vec![2]);
    }

    #[test]
    fn test_feature_vector_width_is_checked() {
        let schema = Arc::new(FeatureSchema::new(["Age", "BMI"]).unwrap());
        assert!(FeatureVector::new(schema.clone(), vec![1.0]).is_err());

        let v = FeatureVector::new(schema, vec![30.0, 22.0]).unwrap();
        assert_eq!(v.get("BMI"), Some(22.0));
        assert_eq!(v.to_row_matrix().shape(), &[1, 2]);
        let pairs: Vec<(&str, f64)> = v.iter().collect();
        assert_eq!(pairs, vec![("Age", 30.0), ("BMI", 22.0)]);
    }

    #[test]
    fn test_feature_matrix_width_is_checked() {
        let schema = FeatureSchema::new(["Age", "BMI"]).unwrap();
        assert!(FeatureMatrix::new(schema.clone(), Array2::zeros((3, 3))).is_err());
        let m = FeatureMatrix::new(schema, Array2::zeros((3, 2))).unwrap();
        assert_eq!(m.n_samples(), 3);
    }
}
