//! Training configuration.
//!
//! Every field has a default, so a config file only needs the settings it
//! changes:
//!
//! ```json
//! { "seed": 7, "include_stacking": false, "candidates": ["BaselineMedian", "RandomForest"] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{NutriError, Result};
use crate::search::{Scoring, SearchSpec};
use crate::trainer::candidates::{self, CANDIDATE_NAMES};

/// Settings of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation.
    pub test_size: f64,
    /// Seed for the split, the searches and every stochastic model.
    pub seed: u64,
    /// Always evaluate the per-disease median baseline, even when it is not
    /// listed in `candidates`.
    pub include_baseline: bool,
    pub include_stacking: bool,
    /// Folds used to produce out-of-fold predictions for the meta-regressor.
    pub stacking_cv: usize,
    /// Candidate names, evaluated in this order.
    pub candidates: Vec<String>,
    /// Randomized search settings, keyed by candidate name.
    pub search: BTreeMap<String, SearchSpec>,
    /// Write `<candidate>_search_results.csv` next to the artifact.
    pub write_search_results: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let n_estimators = SearchSpec::new(3, 3)
            .with_scoring(Scoring::R2)
            .with_values("n_estimators", [50i64, 100, 200]);
        let search = [
            candidates::RANDOM_FOREST,
            candidates::GRADIENT_BOOSTING,
            candidates::REGULARIZED_BOOSTING,
        ]
        .into_iter()
        .map(|name| (name.to_string(), n_estimators.clone()))
        .collect();

        Self {
            test_size: 0.2,
            seed: 42,
            include_baseline: true,
            include_stacking: true,
            stacking_cv: 5,
            candidates: CANDIDATE_NAMES.iter().map(|s| s.to_string()).collect(),
            search,
            write_search_results: true,
        }
    }
}

impl TrainingConfig {
    /// Load a JSON config file; missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(NutriError::Config(format!(
                "test_size must be in (0, 1), got {}",
                self.test_size
            )));
        }
        if self.include_stacking && self.stacking_cv < 2 {
            return Err(NutriError::Config(format!(
                "stacking_cv must be at least 2, got {}",
                self.stacking_cv
            )));
        }
        if self.candidates.is_empty() && !self.include_baseline && !self.include_stacking {
            return Err(NutriError::NoCandidates);
        }
        for name in self.candidates.iter().chain(self.search.keys()) {
            if !CANDIDATE_NAMES.contains(&name.as_str()) {
                return Err(NutriError::Config(format!(
                    "unknown candidate {}; expected one of {}",
                    name,
                    CANDIDATE_NAMES.join(", ")
                )));
            }
        }
        for (name, spec) in &self.search {
            spec.validate()
                .map_err(|e| NutriError::Config(format!("search for {}: {}", name, e)))?;
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_test_size(mut self, test_size: f64) -> Self {
        self.test_size = test_size;
        self
    }

    pub fn with_stacking(mut self, include: bool) -> Self {
        self.include_stacking = include;
        self
    }

    pub fn with_stacking_cv(mut self, cv: usize) -> Self {
        self.stacking_cv = cv;
        self
    }

    pub fn with_candidates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_search(mut self, candidate: &str, spec: SearchSpec) -> Self {
        self.search.insert(candidate.to_string(), spec);
        self
    }

    pub fn without_search(mut self) -> Self {
        self.search.clear();
        self
    }

    pub fn with_write_search_results(mut self, write: bool) -> Self {
        self.write_search_results = write;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = TrainingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.candidates.len(), CANDIDATE_NAMES.len());
        assert_eq!(config.search["RandomForest"].n_iter, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"seed": 7, "include_stacking": false,
                "search": {{"GradientBoosting": {{"n_iter": 2, "cv": 4, "scoring": "neg_mean_squared_error",
                "space": {{"learning_rate": [0.05, 0.1], "max_depth": [2, null]}}}}}}}}"#
        )
        .unwrap();
        let config = TrainingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.seed, 7);
        assert!(!config.include_stacking);
        assert_eq!(config.test_size, 0.2);
        let gb = &config.search["GradientBoosting"];
        assert_eq!(gb.scoring, Scoring::NegMeanSquaredError);
        assert_eq!(gb.grid_size(), 4);
        assert!(!config.search.contains_key("RandomForest"));
    }

    #[test]
    fn test_rejects_unknown_fields_and_candidates() {
        assert!(serde_json::from_str::<TrainingConfig>(r#"{"sed": 1}"#).is_err());
        let config = TrainingConfig::default().with_candidates(["DeepNet"]);
        assert!(matches!(config.validate(), Err(NutriError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(TrainingConfig::default().with_test_size(1.5).validate().is_err());
        assert!(TrainingConfig::default().with_stacking_cv(1).validate().is_err());
        assert!(TrainingConfig::default()
            .with_stacking_cv(1)
            .with_stacking(false)
            .validate()
            .is_ok());
    }
}
