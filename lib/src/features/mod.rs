//! Feature engineering and the feature schema contract.
//!
//! - [`FeatureEngineer`]: learns the schema and category lists from training data.
//! - [`FittedFeatureEngineer`]: turns any raw record into a schema-ordered row.
//! - [`FeatureSchema`]: ordered feature names; persisted with every model.
//! - [`FeatureVector`]: one schema-validated row handed to a model.

pub mod encoding;
pub mod engineer;
pub mod schema;

pub use encoding::{DropFirstOneHot, Encoded, FittedDropFirstOneHot};
pub use engineer::{
    FeatureEngineer, FittedFeatureEngineer, MacroRatios, RecordFeatures, CARB_RATIO, FAT_RATIO,
    PROTEIN_RATIO,
};
pub use schema::{FeatureMatrix, FeatureSchema, FeatureVector};

use crate::dataset::PatientDataset;
use crate::error::Result;

/// Engineer a training dataset: fitted engineer plus the feature matrix.
///
/// Running this twice on identical data gives identical schemas and matrices.
pub fn engineer(dataset: &PatientDataset) -> Result<(FittedFeatureEngineer, FeatureMatrix)> {
    FeatureEngineer::new().fit_transform(dataset)
}
