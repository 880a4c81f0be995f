//! Fixtures shared by the nutripredict benchmarks.
//!
//! - Synthetic patient datasets of a given size
//! - A served linear model built from them
//! - Request batches shaped like real API calls

use ndarray::Array2;
use nutripredict::dataset::synthetic;
use nutripredict::features;
use nutripredict::inference::{InferenceService, PredictionRequest};
use nutripredict::model::{FittedModel, LinearRegression, MultiRegressor};
use nutripredict::registry::ModelArtifact;
use nutripredict::{PatientDataset, Result};

pub fn dataset(n_samples: usize) -> PatientDataset {
    synthetic::generate(n_samples, 42)
}

/// Inference service over a linear model fit on `n_samples` synthetic patients.
pub fn linear_service(n_samples: usize) -> Result<InferenceService> {
    let dataset = dataset(n_samples);
    let (engineer, matrix) = features::engineer(&dataset)?;
    let y = dataset.targets()?;
    let model = LinearRegression::default()
        .with_alpha(1e-6)
        .fit_multi(matrix.values().view(), y.view())?;
    let artifact = ModelArtifact::new(
        "LinearRegression",
        matrix.schema().clone(),
        FittedModel::Linear(model),
    )?
    .with_features(engineer)?;
    Ok(InferenceService::from_artifact(artifact))
}

/// `n` requests with the numeric features filled and one-hot columns absent.
pub fn requests(n: usize) -> Vec<PredictionRequest> {
    (0..n)
        .map(|i| {
            let carb = 0.3 + (i % 7) as f64 * 0.03;
            let protein = 0.2 + (i % 5) as f64 * 0.02;
            PredictionRequest::new()
                .with("Age", 20 + (i % 60) as i64)
                .with("BMI", 18.0 + (i % 17) as f64)
                .with("Carb_ratio", carb)
                .with("Protein_ratio", protein)
                .with("Fat_ratio", 1.0 - carb - protein)
        })
        .collect()
}

/// Target-like matrix and a perturbed prediction of it.
pub fn target_pair(n_samples: usize) -> (Array2<f64>, Array2<f64>) {
    let y_true = Array2::from_shape_fn((n_samples, 3), |(i, t)| 50.0 + (i * (t + 3) % 97) as f64);
    let y_pred = y_true.mapv(|v| v * 1.02 + 0.5);
    (y_true, y_pred)
}
