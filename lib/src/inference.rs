//! Request-time prediction: align, infer, derive calories, respond.
//!
//! # Example
//!
//! ```no_run
//! use nutripredict::inference::{InferenceService, PredictionRequest};
//! use nutripredict::registry::ModelRegistry;
//!
//! let registry = ModelRegistry::open("models").unwrap();
//! let service = InferenceService::open(&registry).unwrap();
//! let request: PredictionRequest =
//!     serde_json::from_str(r#"{"Age": 25, "BMI": 22.9, "Carb_ratio": 0.4}"#).unwrap();
//! let result = service.predict(&request).unwrap();
//! println!("{} kcal", result.calories);
//! ```

use ndarray::Axis;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dataset::PatientRecord;
use crate::error::{NutriError, Result};
use crate::features::{FeatureSchema, FeatureVector, FittedFeatureEngineer};
use crate::model::{FittedModel, FittedMultiRegressor};
use crate::registry::{ModelArtifact, ModelRegistry};

/// kcal per gram of protein.
pub const PROTEIN_KCAL_PER_G: f64 = 4.0;
/// kcal per gram of carbohydrate.
pub const CARBS_KCAL_PER_G: f64 = 4.0;
/// kcal per gram of fat.
pub const FAT_KCAL_PER_G: f64 = 9.0;

/// Atwater 4-4-9 energy of a macro triple.
pub fn calories_from_macros(protein: f64, carbs: f64, fat: f64) -> f64 {
    protein * PROTEIN_KCAL_PER_G + carbs * CARBS_KCAL_PER_G + fat * FAT_KCAL_PER_G
}

/// A request body: feature name to raw value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionRequest {
    fields: BTreeMap<String, Value>,
}

impl PredictionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for PredictionRequest {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Predicted macros in grams and their derived energy in kcal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub calories: f64,
}

impl PredictionResult {
    /// Build a result from macros; calories are always derived, never given.
    pub fn from_macros(protein: f64, carbs: f64, fat: f64) -> Self {
        Self {
            protein,
            carbs,
            fat,
            calories: calories_from_macros(protein, carbs, fat),
        }
    }
}

/// Numeric value of a request field, or `None` when it must be coerced to 0.
fn coerce(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Place request values in schema order.
///
/// Schema names absent from the request are zero-filled, values that are not
/// numeric are coerced to zero, and fields outside the schema are ignored.
pub fn align(schema: &Arc<FeatureSchema>, request: &PredictionRequest) -> Result<FeatureVector> {
    let mut values = Vec::with_capacity(schema.len());
    for name in schema.names() {
        let value = match request.get(name) {
            Some(raw) => coerce(raw).unwrap_or_else(|| {
                warn!(feature = %name, value = %raw, "non-numeric value coerced to 0");
                0.0
            }),
            None => {
                warn!(feature = %name, "missing feature filled with 0");
                0.0
            }
        };
        values.push(value);
    }

    let ignored = request
        .fields
        .keys()
        .filter(|k| !schema.contains(k))
        .count();
    if ignored > 0 {
        debug!(ignored, "request fields outside the schema ignored");
    }
    FeatureVector::new(Arc::clone(schema), values)
}

/// The model and schema a service currently answers with.
#[derive(Debug)]
pub struct LoadedModel {
    name: String,
    model: FittedModel,
    schema: Arc<FeatureSchema>,
    features: Option<FittedFeatureEngineer>,
}

impl LoadedModel {
    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        let name = artifact.model_name().to_string();
        let (model, schema, features) = artifact.into_parts();
        Self {
            name,
            model,
            schema: Arc::new(schema),
            features,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    fn infer(&self, row: &FeatureVector) -> Result<PredictionResult> {
        if row.schema() != self.schema.as_ref() {
            return Err(NutriError::SchemaMissing(
                "feature vector was built for a different schema".to_string(),
            ));
        }
        let pred = self.model.predict_multi(row.to_row_matrix().view())?;
        let out = pred.index_axis(Axis(0), 0);
        if out.len() != 3 {
            return Err(NutriError::ShapeMismatch {
                expected: "3 targets".to_string(),
                got: format!("{} targets", out.len()),
            });
        }
        Ok(PredictionResult::from_macros(out[0], out[1], out[2]))
    }
}

/// Serves predictions from one loaded artifact.
///
/// Requests share the loaded model read-only; each call only clones an `Arc`.
/// [`InferenceService::reload`] swaps model and schema together.
#[derive(Debug)]
pub struct InferenceService {
    current: RwLock<Arc<LoadedModel>>,
}

impl InferenceService {
    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self {
            current: RwLock::new(Arc::new(LoadedModel::from_artifact(artifact))),
        }
    }

    /// Load the registry's current artifact. Any failure is fatal for startup.
    pub fn open(registry: &ModelRegistry) -> Result<Self> {
        Ok(Self::from_artifact(registry.load_current()?))
    }

    /// Snapshot of the loaded model; stays valid across reloads.
    pub fn loaded(&self) -> Arc<LoadedModel> {
        Arc::clone(&self.current.read())
    }

    pub fn schema(&self) -> Arc<FeatureSchema> {
        Arc::clone(self.loaded().schema())
    }

    pub fn model_name(&self) -> String {
        self.loaded().name().to_string()
    }

    /// Predict from a request whose keys are feature names.
    pub fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        let loaded = self.loaded();
        let row = align(loaded.schema(), request)?;
        loaded.infer(&row)
    }

    /// Predict from a JSON object and answer with a JSON object.
    pub fn predict_json(&self, body: &str) -> Result<String> {
        let request: PredictionRequest = serde_json::from_str(body)?;
        let result = self.predict(&request)?;
        Ok(serde_json::to_string(&result)?)
    }

    /// Predict from a raw patient record (gender, disease, macros or ratios).
    ///
    /// Uses the training-time feature engineer when the artifact carries one;
    /// otherwise the record's numeric fields are aligned by name.
    pub fn predict_record(&self, record: &PatientRecord) -> Result<PredictionResult> {
        let loaded = self.loaded();
        let row = match &loaded.features {
            Some(engineer) => {
                let features = engineer.transform_record(record);
                for name in &features.defaulted {
                    warn!(feature = name, "missing feature filled with 0");
                }
                for (column, category) in &features.unseen {
                    warn!(column = %column, category = %category, "unseen category encoded as baseline");
                }
                FeatureVector::new(Arc::clone(loaded.schema()), features.values)?
            }
            None => {
                let request: PredictionRequest = loaded
                    .schema()
                    .names()
                    .iter()
                    .filter_map(|name| {
                        record
                            .number(name)
                            .map(|v| (name.clone(), Value::from(v)))
                    })
                    .collect();
                align(loaded.schema(), &request)?
            }
        };
        loaded.infer(&row)
    }

    /// Replace the served artifact. In-flight requests finish on the old one.
    pub fn reload(&self, artifact: ModelArtifact) {
        let next = Arc::new(LoadedModel::from_artifact(artifact));
        tracing::info!(model = next.name(), features = next.schema().len(), "reloaded model");
        *self.current.write() = next;
    }

    /// Reload the registry's current artifact; on failure the old model stays.
    pub fn reload_from(&self, registry: &ModelRegistry) -> Result<()> {
        let artifact = registry.load_current()?;
        self.reload(artifact);
        Ok(())
    }
}
