//! Ordinary least squares with an intercept.
//!
//! - [`LinearRegression`]: configuration, fitted through [`MultiRegressor`]
//!   (all targets at once) or [`Regressor`] (one target).
//! - [`FittedLinearRegression`]: coefficients and intercepts only.
//!
//! Fitting solves the normal equations of the centered problem,
//! `(XcᵀXc + αI) W = XcᵀYc`, by Gaussian elimination with partial pivoting. A
//! tiny jitter is always added to the diagonal so that collinear features (the
//! macro ratios sum to one) still give a unique, finite solution.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::params::{unknown_param, ParamValue, Tunable};
use super::{
    check_features, check_finite, check_fit_inputs, corrupt, CheckIntegrity, FittedMultiRegressor,
    FittedRegressor, MultiRegressor, Regressor,
};
use crate::error::{NutriError, Result};

const JITTER: f64 = 1e-10;

/// Linear regression configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    /// L2 penalty on the coefficients; `0.0` is plain least squares.
    pub alpha: f64,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self { alpha: 0.0 }
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }
}

/// Fitted linear model: `y = x · W + b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedLinearRegression {
    /// `(n_features, n_targets)`
    coefficients: Array2<f64>,
    /// `(n_targets,)`
    intercepts: Array1<f64>,
}

impl FittedLinearRegression {
    pub fn coefficients(&self) -> &Array2<f64> {
        &self.coefficients
    }

    pub fn intercepts(&self) -> &Array1<f64> {
        &self.intercepts
    }
}

impl MultiRegressor for LinearRegression {
    type Fitted = FittedLinearRegression;

    fn fit_multi(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<FittedLinearRegression> {
        check_fit_inputs(&x, y.nrows())?;
        if self.alpha < 0.0 || !self.alpha.is_finite() {
            return Err(NutriError::InvalidParameter(format!(
                "alpha must be a non-negative number, got {}",
                self.alpha
            )));
        }

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| NutriError::EmptyData("no rows".into()))?;
        let y_mean = y
            .mean_axis(Axis(0))
            .ok_or_else(|| NutriError::EmptyData("no rows".into()))?;
        let xc = &x - &x_mean;
        let yc = &y - &y_mean;

        let mut gram = xc.t().dot(&xc);
        let rhs = xc.t().dot(&yc);
        let p = gram.nrows();
        let scale = (gram.diag().sum() / p as f64).max(1.0);
        for i in 0..p {
            gram[[i, i]] += self.alpha + JITTER * scale;
        }

        let coefficients = solve(gram, rhs)?;
        let intercepts = &y_mean - &x_mean.dot(&coefficients);
        Ok(FittedLinearRegression {
            coefficients,
            intercepts,
        })
    }
}

impl Regressor for LinearRegression {
    type Fitted = FittedLinearRegression;

    fn name(&self) -> &'static str {
        "LinearRegression"
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedLinearRegression> {
        let y = y.insert_axis(Axis(1));
        self.fit_multi(x, y)
    }
}

impl FittedMultiRegressor for FittedLinearRegression {
    fn n_features_in(&self) -> usize {
        self.coefficients.nrows()
    }

    fn n_targets(&self) -> usize {
        self.coefficients.ncols()
    }

    fn predict_multi(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        check_features(self.coefficients.nrows(), &x)?;
        Ok(x.dot(&self.coefficients) + &self.intercepts)
    }
}

impl CheckIntegrity for FittedLinearRegression {
    fn check_integrity(&self) -> Result<()> {
        let (n_features, n_targets) = self.coefficients.dim();
        if n_features == 0 || n_targets == 0 || self.intercepts.len() != n_targets {
            return Err(corrupt(format!(
                "linear model with {}x{} coefficients and {} intercepts",
                n_features,
                n_targets,
                self.intercepts.len()
            )));
        }
        check_finite(self.coefficients.iter().copied(), "coefficient")?;
        check_finite(self.intercepts.iter().copied(), "intercept")
    }
}

/// Single-target view: predicts the first target column.
impl FittedRegressor for FittedLinearRegression {
    fn n_features_in(&self) -> usize {
        self.coefficients.nrows()
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let all = self.predict_multi(x)?;
        Ok(all.column(0).to_owned())
    }
}

impl Tunable for LinearRegression {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "alpha" => self.alpha = value.as_non_negative_f64(name)?,
            _ => return Err(unknown_param("LinearRegression", name)),
        }
        Ok(())
    }
}

/// Solve `a · w = b` for a square `a` with Gaussian elimination and partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        let pivot_value = a[[pivot, col]];
        if !pivot_value.is_finite() || pivot_value.abs() < f64::MIN_POSITIVE {
            return Err(NutriError::SingularMatrix(format!(
                "zero pivot in column {}",
                col
            )));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([pivot, k], [col, k]);
            }
            for k in 0..b.ncols() {
                b.swap([pivot, k], [col, k]);
            }
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            for k in 0..b.ncols() {
                b[[row, k]] -= factor * b[[col, k]];
            }
        }
    }

    let mut w = Array2::zeros(b.raw_dim());
    for row in (0..n).rev() {
        for k in 0..b.ncols() {
            let mut acc = b[[row, k]];
            for j in (row + 1)..n {
                acc -= a[[row, j]] * w[[j, k]];
            }
            w[[row, k]] = acc / a[[row, row]];
        }
    }
    Ok(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_exact_line() {
        // y = 2x + 1
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![1.0, 3.0, 5.0, 7.0];
        let fitted = LinearRegression::new().fit(x.view(), y.view()).unwrap();
        let pred = FittedRegressor::predict(&fitted, array![[10.0]].view()).unwrap();
        assert!((pred[0] - 21.0).abs() < 1e-6, "got {}", pred[0]);
    }

    #[test]
    fn test_multi_output_matches_per_target_fits() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 5.0], [4.0, 3.0], [5.0, 8.0]];
        let y = array![[3.0, 1.0], [3.0, 2.0], [8.0, 0.5], [7.0, 4.0], [13.0, 1.0]];
        let joint = LinearRegression::new().fit_multi(x.view(), y.view()).unwrap();
        assert_eq!(joint.n_targets(), 2);
        for t in 0..2 {
            let single = LinearRegression::new()
                .fit(x.view(), y.column(t))
                .unwrap();
            let a = joint.predict_multi(x.view()).unwrap();
            let b = FittedRegressor::predict(&single, x.view()).unwrap();
            for i in 0..x.nrows() {
                assert!((a[[i, t]] - b[i]).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_collinear_features_still_solve() {
        // Second and third columns always sum to one.
        let x = array![[1.0, 0.2, 0.8], [2.0, 0.5, 0.5], [3.0, 0.9, 0.1], [4.0, 0.4, 0.6]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let fitted = LinearRegression::new().fit(x.view(), y.view()).unwrap();
        let pred = FittedRegressor::predict(&fitted, x.view()).unwrap();
        assert!(pred.iter().all(|v| v.is_finite()));
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-4);
        }
    }

    #[test]
    fn test_predict_checks_width() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let y = array![1.0, 2.0, 3.0];
        let fitted = LinearRegression::new().fit(x.view(), y.view()).unwrap();
        assert!(matches!(
            fitted.predict_multi(array![[1.0]].view()),
            Err(NutriError::FeatureMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn test_alpha_param() {
        let mut m = LinearRegression::new();
        m.set_param("alpha", &ParamValue::Float(0.5)).unwrap();
        assert_eq!(m.alpha, 0.5);
        assert!(m.set_param("alpha", &ParamValue::Float(-1.0)).is_err());
        assert!(m.set_param("fit_intercept", &ParamValue::Int(1)).is_err());
    }
}
