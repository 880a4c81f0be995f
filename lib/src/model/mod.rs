//! Regression models with a strict split between configuration and fitted state.
//!
//! Every model comes as a pair of types:
//! - an unfitted configuration (hyperparameters only) implementing [`Regressor`]
//!   or [`MultiRegressor`],
//! - a fitted predictor implementing [`FittedRegressor`] or
//!   [`FittedMultiRegressor`], which holds only what prediction needs and is
//!   serializable.
//!
//! Fitting never mutates the configuration, so one configuration can be fitted
//! concurrently on many folds.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{NutriError, Result};

pub mod baseline;
pub mod boosting;
pub mod forest;
pub mod linear;
pub mod multi_output;
pub mod oblivious;
pub mod params;
pub mod tree;

pub use baseline::{FittedGroupMedian, GroupMedianBaseline};
pub use boosting::{FittedBoostedTrees, GradientBoostingRegressor, RegularizedBoostingRegressor};
pub use forest::{FittedRandomForest, RandomForestRegressor};
pub use linear::{FittedLinearRegression, LinearRegression};
pub use multi_output::{FittedMultiOutput, MultiOutputRegressor};
pub use oblivious::{FittedObliviousBoosting, ObliviousBoostingRegressor};
pub use params::{MaxFeatures, ParamSet, ParamValue, Tunable};
pub use tree::{DecisionTreeRegressor, FittedTree, TreeParams};

use crate::stacking::FittedStackedTargets;

/// Unfitted single-target regressor.
pub trait Regressor: Clone + Send + Sync {
    type Fitted: FittedRegressor;

    /// Short name used in logs and leaderboards.
    fn name(&self) -> &'static str;

    /// Fit on `x` `(n_samples, n_features)` and one target column `y`.
    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Self::Fitted>;
}

/// Fitted single-target regressor.
pub trait FittedRegressor: Send + Sync {
    fn n_features_in(&self) -> usize;

    /// Predict one value per row of `x`.
    ///
    /// # Errors
    /// Returns [`NutriError::FeatureMismatch`] if `x` has the wrong width.
    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>>;
}

/// Structural checks on fitted state that did not come from `fit`, such as a
/// decoded artifact.
///
/// A passing model can predict any correctly shaped input without indexing
/// out of bounds or looping. Failures are [`NutriError::ModelLoad`].
pub trait CheckIntegrity {
    fn check_integrity(&self) -> Result<()>;
}

pub(crate) fn corrupt(detail: impl std::fmt::Display) -> NutriError {
    NutriError::ModelLoad(format!("corrupt model state: {}", detail))
}

pub(crate) fn check_finite(values: impl IntoIterator<Item = f64>, what: &str) -> Result<()> {
    if values.into_iter().all(f64::is_finite) {
        Ok(())
    } else {
        Err(corrupt(format!("non-finite {}", what)))
    }
}

/// Unfitted regressor over a target matrix `(n_samples, n_targets)`.
pub trait MultiRegressor: Clone + Send + Sync {
    type Fitted: FittedMultiRegressor;

    fn fit_multi(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<Self::Fitted>;
}

/// Fitted regressor producing one column per target.
pub trait FittedMultiRegressor: Send + Sync {
    fn n_features_in(&self) -> usize;

    fn n_targets(&self) -> usize;

    fn predict_multi(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>>;
}

pub(crate) fn check_features(expected: usize, x: &ArrayView2<'_, f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(NutriError::FeatureMismatch {
            expected,
            got: x.ncols(),
        });
    }
    Ok(())
}

pub(crate) fn check_fit_inputs(x: &ArrayView2<'_, f64>, n_targets_rows: usize) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(NutriError::EmptyData(format!(
            "cannot fit on a {}x{} matrix",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.nrows() != n_targets_rows {
        return Err(NutriError::ShapeMismatch {
            expected: format!("{} target rows", x.nrows()),
            got: format!("{} target rows", n_targets_rows),
        });
    }
    Ok(())
}

/// Any single-target model the trainer can tune and stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    Linear(LinearRegression),
    RandomForest(RandomForestRegressor),
    GradientBoosting(GradientBoostingRegressor),
    RegularizedBoosting(RegularizedBoostingRegressor),
    ObliviousBoosting(ObliviousBoostingRegressor),
}

impl Estimator {
    /// Reseed the random parts of the model; no-op for deterministic models.
    pub fn with_seed(self, seed: u64) -> Self {
        match self {
            Estimator::Linear(m) => Estimator::Linear(m),
            Estimator::RandomForest(m) => Estimator::RandomForest(m.with_seed(seed)),
            Estimator::GradientBoosting(m) => Estimator::GradientBoosting(m.with_seed(seed)),
            Estimator::RegularizedBoosting(m) => Estimator::RegularizedBoosting(m.with_seed(seed)),
            Estimator::ObliviousBoosting(m) => Estimator::ObliviousBoosting(m.with_seed(seed)),
        }
    }
}

impl Regressor for Estimator {
    type Fitted = FittedEstimator;

    fn name(&self) -> &'static str {
        match self {
            Estimator::Linear(m) => m.name(),
            Estimator::RandomForest(m) => m.name(),
            Estimator::GradientBoosting(m) => m.name(),
            Estimator::RegularizedBoosting(m) => m.name(),
            Estimator::ObliviousBoosting(m) => m.name(),
        }
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedEstimator> {
        Ok(match self {
            Estimator::Linear(m) => FittedEstimator::Linear(Regressor::fit(m, x, y)?),
            Estimator::RandomForest(m) => FittedEstimator::RandomForest(m.fit(x, y)?),
            Estimator::GradientBoosting(m) => FittedEstimator::Boosted(m.fit(x, y)?),
            Estimator::RegularizedBoosting(m) => FittedEstimator::Boosted(m.fit(x, y)?),
            Estimator::ObliviousBoosting(m) => FittedEstimator::Oblivious(m.fit(x, y)?),
        })
    }
}

impl Tunable for Estimator {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match self {
            Estimator::Linear(m) => m.set_param(name, value),
            Estimator::RandomForest(m) => m.set_param(name, value),
            Estimator::GradientBoosting(m) => m.set_param(name, value),
            Estimator::RegularizedBoosting(m) => m.set_param(name, value),
            Estimator::ObliviousBoosting(m) => m.set_param(name, value),
        }
    }
}

/// Fitted counterpart of [`Estimator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedEstimator {
    Linear(FittedLinearRegression),
    RandomForest(FittedRandomForest),
    Boosted(FittedBoostedTrees),
    Oblivious(FittedObliviousBoosting),
}

impl FittedRegressor for FittedEstimator {
    fn n_features_in(&self) -> usize {
        match self {
            FittedEstimator::Linear(m) => FittedMultiRegressor::n_features_in(m),
            FittedEstimator::RandomForest(m) => m.n_features_in(),
            FittedEstimator::Boosted(m) => m.n_features_in(),
            FittedEstimator::Oblivious(m) => m.n_features_in(),
        }
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        match self {
            FittedEstimator::Linear(m) => FittedRegressor::predict(m, x),
            FittedEstimator::RandomForest(m) => m.predict(x),
            FittedEstimator::Boosted(m) => m.predict(x),
            FittedEstimator::Oblivious(m) => m.predict(x),
        }
    }
}

impl CheckIntegrity for FittedEstimator {
    fn check_integrity(&self) -> Result<()> {
        match self {
            FittedEstimator::Linear(m) => m.check_integrity(),
            FittedEstimator::RandomForest(m) => m.check_integrity(),
            FittedEstimator::Boosted(m) => m.check_integrity(),
            FittedEstimator::Oblivious(m) => m.check_integrity(),
        }
    }
}

/// A fitted candidate mapping feature rows to `(protein, carbs, fat)`.
///
/// This is what a model artifact stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedModel {
    Baseline(FittedGroupMedian),
    Linear(FittedLinearRegression),
    PerTarget(FittedMultiOutput<FittedEstimator>),
    Stacking(FittedStackedTargets),
}

impl FittedModel {
    /// Short description of the model family, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FittedModel::Baseline(_) => "group median baseline",
            FittedModel::Linear(_) => "linear regression",
            FittedModel::PerTarget(_) => "per-target estimators",
            FittedModel::Stacking(_) => "stacking ensemble",
        }
    }
}

impl FittedMultiRegressor for FittedModel {
    fn n_features_in(&self) -> usize {
        match self {
            FittedModel::Baseline(m) => m.n_features_in(),
            FittedModel::Linear(m) => FittedMultiRegressor::n_features_in(m),
            FittedModel::PerTarget(m) => m.n_features_in(),
            FittedModel::Stacking(m) => m.n_features_in(),
        }
    }

    fn n_targets(&self) -> usize {
        match self {
            FittedModel::Baseline(m) => m.n_targets(),
            FittedModel::Linear(m) => m.n_targets(),
            FittedModel::PerTarget(m) => m.n_targets(),
            FittedModel::Stacking(m) => m.n_targets(),
        }
    }

    fn predict_multi(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        match self {
            FittedModel::Baseline(m) => m.predict_multi(x),
            FittedModel::Linear(m) => m.predict_multi(x),
            FittedModel::PerTarget(m) => m.predict_multi(x),
            FittedModel::Stacking(m) => m.predict_multi(x),
        }
    }
}

impl CheckIntegrity for FittedModel {
    fn check_integrity(&self) -> Result<()> {
        match self {
            FittedModel::Baseline(m) => m.check_integrity(),
            FittedModel::Linear(m) => m.check_integrity(),
            FittedModel::PerTarget(m) => m.check_integrity(),
            FittedModel::Stacking(m) => m.check_integrity(),
        }
    }
}

/// Stack per-target predictions as columns of an `(n_samples, n_targets)` matrix.
pub(crate) fn stack_columns(n_rows: usize, columns: Vec<Array1<f64>>) -> Array2<f64> {
    let mut out = Array2::zeros((n_rows, columns.len()));
    for (j, col) in columns.into_iter().enumerate() {
        out.column_mut(j).assign(&col);
    }
    out
}

pub(crate) fn column_mean(y: ArrayView1<'_, f64>) -> f64 {
    y.mean().unwrap_or(0.0)
}
