//! Persistence of the selected model together with its feature schema.
//!
//! The registry is a directory holding exactly one current artifact
//! (`best_model.bin`), the leaderboard table and optional search results.
//! Artifacts are bincode-encoded inside an envelope carrying the format version
//! and a CRC-32 of the payload, and written through a temporary file that is
//! renamed into place, so a reader never observes a half-written model.
//! Loading verifies the checksum and then the structure of every fitted
//! component, so a damaged artifact fails at load time rather than at the
//! first prediction.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::TARGET_COLUMNS;
use crate::error::{NutriError, Result};
use crate::features::{FeatureSchema, FittedFeatureEngineer};
use crate::metrics::RegressionMetrics;
use crate::model::{CheckIntegrity, FittedModel, FittedMultiRegressor};
use crate::trainer::Leaderboard;

/// Version of the on-disk artifact layout.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

pub const ARTIFACT_FILE: &str = "best_model.bin";
pub const LEADERBOARD_FILE: &str = "leaderboard.csv";
pub const EVALUATION_FILE: &str = "evaluation_report.csv";

/// On-disk framing of an encoded [`ModelArtifact`].
#[derive(Serialize, Deserialize)]
struct Envelope {
    format_version: u32,
    checksum: u32,
    payload: Vec<u8>,
}

/// A fitted model bundled with the schema it was trained on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    format_version: u32,
    model_name: String,
    target_names: Vec<String>,
    schema: FeatureSchema,
    /// Training-time engineer, for record-level inference.
    features: Option<FittedFeatureEngineer>,
    model: FittedModel,
    metrics: Option<RegressionMetrics>,
}

impl ModelArtifact {
    /// Bundle `model` with `schema`.
    ///
    /// # Errors
    /// [`NutriError::FeatureMismatch`] if the model's input width differs from
    /// the schema, [`NutriError::ShapeMismatch`] if it does not predict the three
    /// macro targets.
    pub fn new(
        model_name: impl Into<String>,
        schema: FeatureSchema,
        model: FittedModel,
    ) -> Result<Self> {
        let artifact = Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_name: model_name.into(),
            target_names: TARGET_COLUMNS.iter().map(|s| s.to_string()).collect(),
            schema,
            features: None,
            model,
            metrics: None,
        };
        artifact.check_consistency()?;
        Ok(artifact)
    }

    /// Attach the feature engineer. Its schema must equal the artifact's.
    pub fn with_features(mut self, features: FittedFeatureEngineer) -> Result<Self> {
        if features.schema() != &self.schema {
            return Err(NutriError::SchemaMissing(
                "feature engineer schema differs from the model schema".to_string(),
            ));
        }
        self.features = Some(features);
        Ok(self)
    }

    pub fn with_metrics(mut self, metrics: RegressionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn target_names(&self) -> &[String] {
        &self.target_names
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn features(&self) -> Option<&FittedFeatureEngineer> {
        self.features.as_ref()
    }

    pub fn model(&self) -> &FittedModel {
        &self.model
    }

    pub fn metrics(&self) -> Option<&RegressionMetrics> {
        self.metrics.as_ref()
    }

    pub fn into_parts(self) -> (FittedModel, FeatureSchema, Option<FittedFeatureEngineer>) {
        (self.model, self.schema, self.features)
    }

    fn check_consistency(&self) -> Result<()> {
        if self.schema.is_empty() {
            return Err(NutriError::SchemaMissing(
                "artifact carries an empty feature schema".to_string(),
            ));
        }
        if self.model.n_features_in() != self.schema.len() {
            return Err(NutriError::FeatureMismatch {
                expected: self.schema.len(),
                got: self.model.n_features_in(),
            });
        }
        if self.model.n_targets() != self.target_names.len() {
            return Err(NutriError::ShapeMismatch {
                expected: format!("{} targets", self.target_names.len()),
                got: format!("{} targets", self.model.n_targets()),
            });
        }
        Ok(())
    }

    /// Everything a decoded artifact must satisfy before it may serve.
    fn check_decoded(&self) -> Result<()> {
        FeatureSchema::new(self.schema.names().to_vec())?;
        if !self
            .target_names
            .iter()
            .map(String::as_str)
            .eq(TARGET_COLUMNS.iter().copied())
        {
            return Err(NutriError::ModelLoad(format!(
                "artifact predicts {:?}, expected {:?}",
                self.target_names, TARGET_COLUMNS
            )));
        }
        self.check_consistency()?;
        if let Some(features) = &self.features {
            if features.schema() != &self.schema {
                return Err(NutriError::ModelLoad(
                    "feature engineer schema differs from the model schema".to_string(),
                ));
            }
            features.check_integrity()?;
        }
        self.model.check_integrity()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let envelope = Envelope {
            format_version: self.format_version,
            checksum: crc32fast::hash(&payload),
            payload,
        };
        Ok(bincode::serialize(&envelope)?)
    }

    /// Decode an artifact, rejecting corrupt bytes, checksum mismatches, other
    /// format versions and structurally invalid models as
    /// [`NutriError::ModelLoad`]. An empty schema is
    /// [`NutriError::SchemaMissing`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope = bincode::deserialize(bytes)
            .map_err(|e| NutriError::ModelLoad(format!("corrupt artifact: {}", e)))?;
        if envelope.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(NutriError::ModelLoad(format!(
                "unsupported artifact format version {} (expected {})",
                envelope.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        let checksum = crc32fast::hash(&envelope.payload);
        if checksum != envelope.checksum {
            return Err(NutriError::ModelLoad(format!(
                "artifact checksum mismatch: stored {:08x}, computed {:08x}",
                envelope.checksum, checksum
            )));
        }

        let artifact: Self = bincode::deserialize(&envelope.payload)
            .map_err(|e| NutriError::ModelLoad(format!("corrupt artifact: {}", e)))?;
        if artifact.format_version != envelope.format_version {
            return Err(NutriError::ModelLoad(format!(
                "artifact format version {} disagrees with its envelope ({})",
                artifact.format_version, envelope.format_version
            )));
        }
        artifact.check_decoded().map_err(|e| match e {
            NutriError::SchemaMissing(_) | NutriError::ModelLoad(_) => e,
            other => NutriError::ModelLoad(other.to_string()),
        })?;
        Ok(artifact)
    }

    /// Write the artifact atomically: temporary file in the same directory,
    /// then rename.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, self.to_bytes()?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            NutriError::ModelLoad(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }
}

/// Location of a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    path: PathBuf,
}

impl ArtifactHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Directory-backed store of the single current artifact.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
}

impl ModelRegistry {
    /// Open (and create if needed) a registry directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Handle of the current artifact, whether or not it exists yet.
    pub fn current(&self) -> ArtifactHandle {
        ArtifactHandle::new(self.root.join(ARTIFACT_FILE))
    }

    /// Replace the current artifact.
    pub fn persist(&self, artifact: &ModelArtifact) -> Result<ArtifactHandle> {
        let handle = self.current();
        artifact.save_to_file(handle.path())?;
        info!(
            path = %handle.path().display(),
            model = artifact.model_name(),
            features = artifact.schema().len(),
            "persisted model artifact"
        );
        Ok(handle)
    }

    /// Load an artifact as `(model, schema)` plus the rest of its metadata.
    pub fn load(&self, handle: &ArtifactHandle) -> Result<ModelArtifact> {
        let artifact = ModelArtifact::load_from_file(handle.path())?;
        info!(
            path = %handle.path().display(),
            model = artifact.model_name(),
            kind = artifact.model().kind(),
            "loaded model artifact"
        );
        Ok(artifact)
    }

    pub fn load_current(&self) -> Result<ModelArtifact> {
        self.load(&self.current())
    }

    pub fn leaderboard_path(&self) -> PathBuf {
        self.root.join(LEADERBOARD_FILE)
    }

    pub fn persist_leaderboard(&self, leaderboard: &Leaderboard) -> Result<PathBuf> {
        let path = self.leaderboard_path();
        leaderboard.save_to_file(&path)?;
        info!(path = %path.display(), rows = leaderboard.len(), "saved leaderboard");
        Ok(path)
    }

    /// Where the per-target evaluation of the current artifact is written.
    pub fn evaluation_path(&self) -> PathBuf {
        self.root.join(EVALUATION_FILE)
    }

    pub fn search_results_path(&self, candidate: &str) -> PathBuf {
        self.root.join(format!("{}_search_results.csv", candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Estimator, LinearRegression, MultiOutputRegressor, MultiRegressor, RandomForestRegressor,
        TreeParams, Tunable,
    };
    use ndarray::{array, Array2};

    fn schema() -> FeatureSchema {
        FeatureSchema::new(["Age", "BMI"]).unwrap()
    }

    fn linear_model(n_features: usize) -> FittedModel {
        let x = Array2::from_shape_fn((8, n_features), |(i, j)| (i * (j + 1)) as f64 + j as f64);
        let y = Array2::from_shape_fn((8, 3), |(i, t)| (i + t) as f64);
        FittedModel::Linear(
            LinearRegression::default()
                .with_alpha(1e-3)
                .fit_multi(x.view(), y.view())
                .unwrap(),
        )
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path().join("models")).unwrap();
        let artifact = ModelArtifact::new("LinearRegression", schema(), linear_model(2)).unwrap();

        let handle = registry.persist(&artifact).unwrap();
        assert_eq!(handle, registry.current());
        assert!(!handle.path().with_extension("bin.tmp").exists());

        let loaded = registry.load(&handle).unwrap();
        assert_eq!(loaded.schema(), &schema());
        assert_eq!(loaded.model_name(), "LinearRegression");
        let x = array![[30.0, 22.0]];
        assert_eq!(
            loaded.model().predict_multi(x.view()).unwrap(),
            artifact.model().predict_multi(x.view()).unwrap()
        );
    }

    #[test]
    fn test_rejects_schema_width_mismatch() {
        let err = ModelArtifact::new("LinearRegression", schema(), linear_model(3)).unwrap_err();
        assert!(matches!(err, NutriError::FeatureMismatch { expected: 2, got: 3 }));
    }

    #[test]
    fn test_missing_and_corrupt_artifacts_are_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let err = registry.load_current().unwrap_err();
        assert!(matches!(err, NutriError::ModelLoad(_)));
        assert!(err.is_fatal_for_serving());

        fs::write(registry.current().path(), b"not a model").unwrap();
        assert!(matches!(registry.load_current(), Err(NutriError::ModelLoad(_))));
    }

    #[test]
    fn test_rejects_other_format_version() {
        let mut artifact = ModelArtifact::new("LinearRegression", schema(), linear_model(2)).unwrap();
        artifact.format_version = ARTIFACT_FORMAT_VERSION + 1;
        let bytes = artifact.to_bytes().unwrap();
        let err = ModelArtifact::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("format version"));
    }

    #[test]
    fn test_any_flipped_byte_is_a_load_error() {
        let artifact = ModelArtifact::new("LinearRegression", schema(), linear_model(2)).unwrap();
        let bytes = artifact.to_bytes().unwrap();
        for i in 0..bytes.len() {
            let mut damaged = bytes.clone();
            damaged[i] ^= 0xFF;
            match ModelArtifact::from_bytes(&damaged) {
                Err(NutriError::ModelLoad(_)) => {}
                other => panic!("byte {} flipped: expected ModelLoad, got {:?}", i, other.map(|_| ())),
            }
        }
    }

    /// One depth-1 tree per target, splitting feature 0 at 9.5.
    fn stump_model() -> FittedModel {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { i as f64 } else { 1.0 });
        let y = Array2::from_shape_fn((20, 3), |(i, _)| if i < 10 { 0.0 } else { 1.0 });
        let mut forest = RandomForestRegressor {
            tree: TreeParams::default().with_max_depth(Some(1)),
            ..Default::default()
        }
        .with_n_estimators(1);
        forest.set_param("bootstrap", &false.into()).unwrap();
        FittedModel::PerTarget(
            MultiOutputRegressor::new(Estimator::RandomForest(forest))
                .fit_multi(x.view(), y.view())
                .unwrap(),
        )
    }

    #[test]
    fn test_rejects_tree_splitting_on_a_missing_feature() {
        let artifact = ModelArtifact::new("RandomForest", schema(), stump_model()).unwrap();
        let mut payload = bincode::serialize(&artifact).unwrap();

        // Node::Split is variant 1: tag, feature index, threshold.
        let mut split = 1u32.to_le_bytes().to_vec();
        split.extend_from_slice(&0u64.to_le_bytes());
        split.extend_from_slice(&9.5f64.to_le_bytes());
        let at = payload
            .windows(split.len())
            .position(|w| w == split.as_slice())
            .expect("split node in payload");
        payload[at + 4..at + 12].copy_from_slice(&7u64.to_le_bytes());

        // Re-frame with a valid checksum so only the structure is wrong.
        let bytes = bincode::serialize(&Envelope {
            format_version: ARTIFACT_FORMAT_VERSION,
            checksum: crc32fast::hash(&payload),
            payload,
        })
        .unwrap();
        let err = ModelArtifact::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, NutriError::ModelLoad(_)), "{}", err);
        assert!(err.to_string().contains("feature 7"));
    }

    #[test]
    fn test_stump_artifact_loads_and_predicts() {
        let artifact = ModelArtifact::new("RandomForest", schema(), stump_model()).unwrap();
        let loaded = ModelArtifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
        let pred = loaded.model().predict_multi(array![[3.0, 1.0], [15.0, 1.0]].view()).unwrap();
        assert_eq!(pred, array![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]);
    }

    #[test]
    fn test_leaderboard_and_search_paths() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let mut board = Leaderboard::new();
        board.push(crate::trainer::LeaderboardEntry::new(
            "LinearRegression",
            RegressionMetrics::new(1.0, 1.0, 0.5),
        ));
        let path = registry.persist_leaderboard(&board).unwrap();
        assert_eq!(Leaderboard::load_from_file(path).unwrap().len(), 1);
        assert!(registry
            .search_results_path("RandomForest")
            .ends_with("RandomForest_search_results.csv"));
        assert_eq!(registry.evaluation_path(), dir.path().join(EVALUATION_FILE));
    }
}
