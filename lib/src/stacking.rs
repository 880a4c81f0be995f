//! Per-target stacking of tree ensembles under a linear meta-regressor.
//!
//! For each target, every base learner is fitted on all but one fold and
//! predicts the held-out fold. The linear meta-regressor is trained on these
//! out-of-fold predictions only (raw features are not passed through), and the
//! base learners are then refit on the whole training split for serving.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::split::{select_rows, select_values, KFold};
use crate::error::{NutriError, Result};
use crate::metrics::Metrics;
use crate::model::{
    check_features, corrupt, stack_columns, CheckIntegrity, Estimator, FittedEstimator, FittedLinearRegression,
    FittedMultiRegressor, FittedRegressor, GradientBoostingRegressor, LinearRegression,
    MultiRegressor, ObliviousBoostingRegressor, RandomForestRegressor, RegularizedBoostingRegressor,
    Regressor,
};
use crate::trainer::leaderboard::LeaderboardEntry;

/// Leaderboard name of the ensemble.
pub const STACKING_NAME: &str = "StackingEnsemble";

/// Suffix of the aggregate entry scoring all targets jointly.
pub const ALL_TARGETS_SUFFIX: &str = "All";

/// Stacking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingEnsemble {
    base: Vec<(String, Estimator)>,
    meta: LinearRegression,
    cv: usize,
}

impl Default for StackingEnsemble {
    /// Random forest, gradient boosting, regularized boosting and oblivious
    /// boosting with default settings, five folds.
    fn default() -> Self {
        Self::new(
            vec![
                (
                    "rf".to_string(),
                    Estimator::RandomForest(RandomForestRegressor::default()),
                ),
                (
                    "gb".to_string(),
                    Estimator::GradientBoosting(GradientBoostingRegressor::default()),
                ),
                (
                    "rgb".to_string(),
                    Estimator::RegularizedBoosting(RegularizedBoostingRegressor::default()),
                ),
                (
                    "obl".to_string(),
                    Estimator::ObliviousBoosting(ObliviousBoostingRegressor::default()),
                ),
            ],
            5,
        )
    }
}

impl StackingEnsemble {
    pub fn new(base: Vec<(String, Estimator)>, cv: usize) -> Self {
        Self {
            base,
            meta: LinearRegression::default(),
            cv,
        }
    }

    pub fn with_cv(mut self, cv: usize) -> Self {
        self.cv = cv;
        self
    }

    /// Reseed every base learner.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base = self
            .base
            .into_iter()
            .map(|(name, est)| (name, est.with_seed(seed)))
            .collect();
        self
    }

    pub fn base_learners(&self) -> &[(String, Estimator)] {
        &self.base
    }

    /// Out-of-fold base predictions, `(n_samples, n_base)`.
    fn out_of_fold(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<Array2<f64>> {
        let folds = KFold::new(self.cv)?.split(x.nrows())?;
        let jobs: Vec<(usize, usize)> = (0..folds.len())
            .flat_map(|f| (0..self.base.len()).map(move |b| (f, b)))
            .collect();
        let predictions = jobs
            .par_iter()
            .map(|&(f, b)| {
                let fold = &folds[f];
                let fitted = self.base[b].1.fit(
                    select_rows(x, &fold.train).view(),
                    select_values(y, &fold.train).view(),
                )?;
                fitted.predict(select_rows(x, &fold.test).view())
            })
            .collect::<Result<Vec<_>>>()?;

        let mut oof = Array2::zeros((x.nrows(), self.base.len()));
        for (&(f, b), pred) in jobs.iter().zip(predictions) {
            for (&row, value) in folds[f].test.iter().zip(pred.iter()) {
                oof[[row, b]] = *value;
            }
        }
        Ok(oof)
    }
}

/// Fitted stack for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedStackedRegressor {
    base: Vec<(String, FittedEstimator)>,
    meta: FittedLinearRegression,
    n_features_in: usize,
}

impl FittedStackedRegressor {
    pub fn base_learners(&self) -> &[(String, FittedEstimator)] {
        &self.base
    }

    pub fn meta(&self) -> &FittedLinearRegression {
        &self.meta
    }

    fn base_predictions(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let columns = self
            .base
            .iter()
            .map(|(_, est)| est.predict(x))
            .collect::<Result<Vec<_>>>()?;
        Ok(stack_columns(x.nrows(), columns))
    }
}

impl Regressor for StackingEnsemble {
    type Fitted = FittedStackedRegressor;

    fn name(&self) -> &'static str {
        STACKING_NAME
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedStackedRegressor> {
        if self.base.is_empty() {
            return Err(NutriError::NoCandidates);
        }
        let oof = self.out_of_fold(x, y)?;
        let meta = Regressor::fit(&self.meta, oof.view(), y)?;
        debug!(weights = ?meta.coefficients().column(0).to_vec(), "meta-regressor fitted");

        let base = self
            .base
            .par_iter()
            .map(|(name, est)| -> Result<(String, FittedEstimator)> {
                Ok((name.clone(), est.fit(x, y)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FittedStackedRegressor {
            base,
            meta,
            n_features_in: x.ncols(),
        })
    }
}

impl FittedRegressor for FittedStackedRegressor {
    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        check_features(self.n_features_in, &x)?;
        let stacked = self.base_predictions(x)?;
        FittedRegressor::predict(&self.meta, stacked.view())
    }
}

impl CheckIntegrity for FittedStackedRegressor {
    fn check_integrity(&self) -> Result<()> {
        if self.base.is_empty() {
            return Err(corrupt("stack without base learners"));
        }
        for (name, est) in &self.base {
            if est.n_features_in() != self.n_features_in {
                return Err(corrupt(format!(
                    "base learner {} reads {} features, stack reads {}",
                    name,
                    est.n_features_in(),
                    self.n_features_in
                )));
            }
            est.check_integrity()?;
        }
        self.meta.check_integrity()?;
        if FittedMultiRegressor::n_features_in(&self.meta) != self.base.len() {
            return Err(corrupt("meta-regressor width differs from the base learner count"));
        }
        Ok(())
    }
}

/// One fitted stack per target, in target order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedStackedTargets {
    targets: Vec<FittedStackedRegressor>,
}

impl FittedStackedTargets {
    pub fn targets(&self) -> &[FittedStackedRegressor] {
        &self.targets
    }
}

impl MultiRegressor for StackingEnsemble {
    type Fitted = FittedStackedTargets;

    fn fit_multi(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<FittedStackedTargets> {
        let targets = (0..y.ncols())
            .map(|t| self.fit(x, y.column(t)))
            .collect::<Result<Vec<_>>>()?;
        Ok(FittedStackedTargets { targets })
    }
}

impl FittedMultiRegressor for FittedStackedTargets {
    fn n_features_in(&self) -> usize {
        self.targets.first().map_or(0, |t| t.n_features_in)
    }

    fn n_targets(&self) -> usize {
        self.targets.len()
    }

    fn predict_multi(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let columns = self
            .targets
            .iter()
            .map(|t| t.predict(x))
            .collect::<Result<Vec<_>>>()?;
        Ok(stack_columns(x.nrows(), columns))
    }
}

impl CheckIntegrity for FittedStackedTargets {
    fn check_integrity(&self) -> Result<()> {
        let Some(first) = self.targets.first() else {
            return Err(corrupt("stacking ensemble without targets"));
        };
        for stack in &self.targets {
            if stack.n_features_in != first.n_features_in {
                return Err(corrupt("per-target stacks disagree on the input width"));
            }
            stack.check_integrity()?;
        }
        Ok(())
    }
}

/// Leaderboard rows and the fitted ensemble from one stacking evaluation.
#[derive(Debug, Clone)]
pub struct StackingReport {
    /// `<base>_<target>`, `StackingEnsemble_<target>` and `StackingEnsemble_All`.
    pub entries: Vec<LeaderboardEntry>,
    pub fitted: FittedStackedTargets,
}

impl StackingReport {
    /// Name of the aggregate entry.
    pub fn aggregate_name() -> String {
        format!("{}_{}", STACKING_NAME, ALL_TARGETS_SUFFIX)
    }
}

/// Fit the ensemble per target on the training split and score it on the test
/// split. The aggregate entry is computed from exactly the per-target
/// predictions that produced the per-target rows.
pub fn evaluate_stacking(
    ensemble: &StackingEnsemble,
    x_train: ArrayView2<'_, f64>,
    y_train: ArrayView2<'_, f64>,
    x_test: ArrayView2<'_, f64>,
    y_test: ArrayView2<'_, f64>,
    target_names: &[&str],
) -> Result<StackingReport> {
    if target_names.len() != y_train.ncols() || y_train.ncols() != y_test.ncols() {
        return Err(NutriError::ShapeMismatch {
            expected: format!("{} target columns", target_names.len()),
            got: format!("{} train / {} test", y_train.ncols(), y_test.ncols()),
        });
    }

    let mut entries = Vec::new();
    let mut targets = Vec::with_capacity(target_names.len());
    let mut stacked_columns = Vec::with_capacity(target_names.len());

    for (t, target) in target_names.iter().enumerate() {
        info!(target_name = %target, "fitting stacking ensemble");
        let fitted = ensemble.fit(x_train, y_train.column(t))?;
        let y_true = y_test.column(t);

        for (name, est) in fitted.base_learners() {
            let pred = est.predict(x_test)?;
            let metrics = Metrics::calculate(y_true, pred.view())?;
            entries.push(LeaderboardEntry::per_target(
                format!("{}_{}", name, target),
                metrics,
            ));
        }

        let pred = fitted.predict(x_test)?;
        let metrics = Metrics::calculate(y_true, pred.view())?;
        info!(target_name = %target, r2 = metrics.r2, rmse = metrics.rmse, "stacking target evaluated");
        entries.push(LeaderboardEntry::per_target(
            format!("{}_{}", STACKING_NAME, target),
            metrics,
        ));
        stacked_columns.push(pred);
        targets.push(fitted);
    }

    let all = stack_columns(x_test.nrows(), stacked_columns);
    let metrics = Metrics::calculate_multi(y_test, all.view())?;
    info!(r2 = metrics.r2, rmse = metrics.rmse, "stacking ensemble evaluated on all targets");
    entries.push(LeaderboardEntry::new(StackingReport::aggregate_name(), metrics));

    Ok(StackingReport {
        entries,
        fitted: FittedStackedTargets { targets },
    })
}
