//! # nutripredict
//!
//! Predicts recommended daily protein, carbohydrate and fat from patient
//! features, derives calories with the Atwater 4-4-9 rule, and keeps training
//! and serving on the same feature contract.
//!
//! ## Core Design Principles
//!
//! - **Explicit schema**: every artifact stores the ordered feature names it was
//!   trained on; inference aligns requests to exactly that order.
//! - **Fitted types**: unfitted models are configuration, `fit` returns a
//!   separate fitted type that can only predict.
//! - **One feature path**: training rows and request records go through the same
//!   [`features::FittedFeatureEngineer::transform_record`].
//! - **Calories are derived**: only macros are learned.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nutripredict::config::TrainingConfig;
//! use nutripredict::dataset::PatientDataset;
//! use nutripredict::inference::{InferenceService, PredictionRequest};
//! use nutripredict::pipeline::TrainingPipeline;
//! use nutripredict::registry::ModelRegistry;
//!
//! let dataset = PatientDataset::from_csv_path("data/cleaned_nutricare.csv").unwrap();
//! let registry = ModelRegistry::open("models").unwrap();
//! let report = TrainingPipeline::new(TrainingConfig::default())
//!     .run(&dataset, &registry)
//!     .unwrap();
//! println!("{}", report.leaderboard);
//!
//! let service = InferenceService::open(&registry).unwrap();
//! let request = PredictionRequest::new().with("Age", 25).with("BMI", 22.9);
//! println!("{:?}", service.predict(&request).unwrap());
//! ```
//!
//! ## Module Structure
//!
//! - `dataset`: cleaned-table loading, splits, synthetic patients
//! - `features`: feature engineering and the feature schema
//! - `model`: regressors (linear, trees, forests, boosting, baseline)
//! - `search`: randomized hyperparameter search with k-fold CV
//! - `stacking`: per-target stacked ensemble
//! - `trainer`: candidate evaluation and the leaderboard
//! - `registry`: artifact persistence
//! - `inference`: request alignment, prediction and calorie derivation
//! - `pipeline`: the end-to-end training run and held-out evaluation

/// Training configuration loaded from JSON.
pub mod config;

/// Patient records, datasets and splits.
pub mod dataset;

pub mod error;

/// Feature engineering and the feature schema contract.
pub mod features;

/// Request-time prediction.
pub mod inference;

pub mod logging;

/// Regression metrics.
pub mod metrics;

/// Regressors with separate unfitted and fitted types.
pub mod model;

/// End-to-end training run.
pub mod pipeline;

/// Persistence of the selected model.
pub mod registry;

/// Randomized hyperparameter search.
pub mod search;

/// Stacked ensembles.
pub mod stacking;

/// Candidate evaluation and leaderboards.
pub mod trainer;

pub use config::TrainingConfig;
pub use dataset::{PatientDataset, PatientRecord};
pub use error::{NutriError, Result};
pub use features::{FeatureSchema, FeatureVector};
pub use inference::{InferenceService, PredictionRequest, PredictionResult};
pub use pipeline::{EvaluationReport, TrainingPipeline, TrainingReport};
pub use registry::{ModelArtifact, ModelRegistry};
pub use trainer::{Leaderboard, LeaderboardEntry};
