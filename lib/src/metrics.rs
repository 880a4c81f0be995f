//! Regression metrics used to rank candidates.
//!
//! Multi-output conventions: MAE and MSE average over every cell of the
//! prediction matrix, RMSE is the square root of that MSE, and R² is the
//! unweighted mean of the per-target R² values.
//!
//! [`per_target_report`] adds the detailed error profile of each macro target
//! for evaluating a persisted model.

use ndarray::{ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{NutriError, Result};

/// Metrics for evaluating regression models.
pub struct Metrics;

fn check_len(y_true: usize, y_pred: usize) -> Result<()> {
    if y_true != y_pred {
        return Err(NutriError::ShapeMismatch {
            expected: format!("{} predictions", y_true),
            got: format!("{} predictions", y_pred),
        });
    }
    Ok(())
}

impl Metrics {
    /// Mean Squared Error: `mean((y_true - y_pred)^2)`. Lower is better.
    pub fn mse(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Result<f64> {
        check_len(y_true.len(), y_pred.len())?;
        if y_true.is_empty() {
            return Ok(0.0);
        }
        let sum_sq = Zip::from(&y_true)
            .and(&y_pred)
            .fold(0.0, |acc, &t, &p| acc + (t - p).powi(2));
        Ok(sum_sq / y_true.len() as f64)
    }

    /// Root Mean Squared Error, in target units.
    pub fn rmse(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Result<f64> {
        Ok(Self::mse(y_true, y_pred)?.sqrt())
    }

    /// Mean Absolute Error: `mean(|y_true - y_pred|)`.
    pub fn mae(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Result<f64> {
        check_len(y_true.len(), y_pred.len())?;
        if y_true.is_empty() {
            return Ok(0.0);
        }
        let sum_abs = Zip::from(&y_true)
            .and(&y_pred)
            .fold(0.0, |acc, &t, &p| acc + (t - p).abs());
        Ok(sum_abs / y_true.len() as f64)
    }

    /// Coefficient of determination, `1 - SS_res / SS_tot`.
    ///
    /// Higher is better; negative when the model is worse than predicting the
    /// mean. A constant target scores 1.0 if predicted exactly, else 0.0.
    pub fn r_squared(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Result<f64> {
        check_len(y_true.len(), y_pred.len())?;
        if y_true.is_empty() {
            return Ok(0.0);
        }
        let mean_true = y_true.sum() / y_true.len() as f64;
        let ss_res = Zip::from(&y_true)
            .and(&y_pred)
            .fold(0.0, |acc, &t, &p| acc + (t - p).powi(2));
        let ss_tot: f64 = y_true.iter().map(|&t| (t - mean_true).powi(2)).sum();

        if ss_tot == 0.0 {
            return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
        }
        Ok(1.0 - ss_res / ss_tot)
    }

    /// Mean absolute percentage error as a fraction, `mean(|t - p| / |t|)`.
    ///
    /// Zero actuals are divided by `f64::EPSILON` instead, so a miss on a zero
    /// target is very large rather than infinite.
    pub fn mape(y_true: ArrayView1<'_, f64>, y_pred: ArrayView1<'_, f64>) -> Result<f64> {
        check_len(y_true.len(), y_pred.len())?;
        if y_true.is_empty() {
            return Ok(0.0);
        }
        let sum = Zip::from(&y_true)
            .and(&y_pred)
            .fold(0.0, |acc, &t, &p| acc + (t - p).abs() / t.abs().max(f64::EPSILON));
        Ok(sum / y_true.len() as f64)
    }

    /// `1 - Var(y_true - y_pred) / Var(y_true)`.
    ///
    /// Unlike R² it ignores a constant bias. A constant target scores 1.0 if
    /// the residuals are constant, else 0.0.
    pub fn explained_variance(
        y_true: ArrayView1<'_, f64>,
        y_pred: ArrayView1<'_, f64>,
    ) -> Result<f64> {
        check_len(y_true.len(), y_pred.len())?;
        if y_true.is_empty() {
            return Ok(0.0);
        }
        let residuals = &y_true - &y_pred;
        let var_res = residuals.var(0.0);
        let var_true = y_true.var(0.0);
        if var_true == 0.0 {
            return Ok(if var_res == 0.0 { 1.0 } else { 0.0 });
        }
        Ok(1.0 - var_res / var_true)
    }

    /// All metrics for one target.
    pub fn calculate(
        y_true: ArrayView1<'_, f64>,
        y_pred: ArrayView1<'_, f64>,
    ) -> Result<RegressionMetrics> {
        let mse = Self::mse(y_true, y_pred)?;
        Ok(RegressionMetrics::new(
            Self::mae(y_true, y_pred)?,
            mse,
            Self::r_squared(y_true, y_pred)?,
        ))
    }

    /// All metrics over a `(n_samples, n_targets)` matrix.
    pub fn calculate_multi(
        y_true: ArrayView2<'_, f64>,
        y_pred: ArrayView2<'_, f64>,
    ) -> Result<RegressionMetrics> {
        if y_true.shape() != y_pred.shape() {
            return Err(NutriError::ShapeMismatch {
                expected: format!("{:?}", y_true.shape()),
                got: format!("{:?}", y_pred.shape()),
            });
        }
        let n_targets = y_true.ncols();
        if n_targets == 0 || y_true.nrows() == 0 {
            return Err(NutriError::EmptyData("no predictions to score".into()));
        }

        let cells = y_true.len() as f64;
        let (sum_abs, sum_sq) = Zip::from(&y_true)
            .and(&y_pred)
            .fold((0.0, 0.0), |(a, s), &t, &p| (a + (t - p).abs(), s + (t - p).powi(2)));

        let mut r2_sum = 0.0;
        for t in 0..n_targets {
            r2_sum += Self::r_squared(y_true.column(t), y_pred.column(t))?;
        }

        Ok(RegressionMetrics::new(
            sum_abs / cells,
            sum_sq / cells,
            r2_sum / n_targets as f64,
        ))
    }
}

/// MAE, MSE, RMSE and R² of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn new(mae: f64, mse: f64, r2: f64) -> Self {
        Self {
            mae,
            mse,
            rmse: mse.sqrt(),
            r2,
        }
    }
}

/// Percentile `q` (0 to 100) with linear interpolation between order
/// statistics. Sorts `values` in place; `0.0` for an empty slice.
pub fn percentile(values: &mut [f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let rank = q.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

/// Detailed evaluation of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetReport {
    pub target: String,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
    /// Percent.
    pub mape: f64,
    pub explained_variance: f64,
    pub mean_actual: f64,
    pub mean_predicted: f64,
    /// `mean_predicted - mean_actual`.
    pub bias: f64,
    pub min_predicted: f64,
    pub max_predicted: f64,
    pub median_abs_error: f64,
    pub p95_abs_error: f64,
}

impl TargetReport {
    pub fn calculate(
        target: impl Into<String>,
        y_true: ArrayView1<'_, f64>,
        y_pred: ArrayView1<'_, f64>,
    ) -> Result<Self> {
        check_len(y_true.len(), y_pred.len())?;
        if y_true.is_empty() {
            return Err(NutriError::EmptyData("no predictions to score".into()));
        }
        let n = y_true.len() as f64;
        let mean_actual = y_true.sum() / n;
        let mean_predicted = y_pred.sum() / n;
        let mut abs_errors: Vec<f64> = Zip::from(&y_true)
            .and(&y_pred)
            .map_collect(|&t, &p| (t - p).abs())
            .to_vec();

        Ok(Self {
            target: target.into(),
            mae: Metrics::mae(y_true, y_pred)?,
            rmse: Metrics::rmse(y_true, y_pred)?,
            r2: Metrics::r_squared(y_true, y_pred)?,
            mape: Metrics::mape(y_true, y_pred)? * 100.0,
            explained_variance: Metrics::explained_variance(y_true, y_pred)?,
            mean_actual,
            mean_predicted,
            bias: mean_predicted - mean_actual,
            min_predicted: y_pred.iter().copied().fold(f64::INFINITY, f64::min),
            max_predicted: y_pred.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            median_abs_error: percentile(&mut abs_errors, 50.0),
            p95_abs_error: percentile(&mut abs_errors, 95.0),
        })
    }
}

/// One [`TargetReport`] per column of a `(n_samples, n_targets)` prediction,
/// named by `target_names`.
pub fn per_target_report(
    y_true: ArrayView2<'_, f64>,
    y_pred: ArrayView2<'_, f64>,
    target_names: &[&str],
) -> Result<Vec<TargetReport>> {
    if y_true.shape() != y_pred.shape() || target_names.len() != y_true.ncols() {
        return Err(NutriError::ShapeMismatch {
            expected: format!("{:?} for {} targets", y_true.shape(), target_names.len()),
            got: format!("{:?}", y_pred.shape()),
        });
    }
    target_names
        .iter()
        .enumerate()
        .map(|(t, name)| TargetReport::calculate(*name, y_true.column(t), y_pred.column(t)))
        .collect()
}
