//! Gradient boosting on squared loss.
//!
//! Two configurations share one fitted representation:
//! - [`GradientBoostingRegressor`]: shallow unregularized trees with a small
//!   learning rate and optional row subsampling.
//! - [`RegularizedBoostingRegressor`]: deeper trees with an L2 penalty on leaf
//!   values, a minimum split gain, and row and column subsampling per tree.
//!
//! Both start from the target mean and add `learning_rate * tree(x)` per stage,
//! each tree fitted to the current residuals.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::params::{unknown_param, MaxFeatures, ParamValue, Tunable};
use super::tree::{check_trees, grow_tree, FittedTree, TreeParams};
use super::{
    check_features, check_finite, check_fit_inputs, column_mean, CheckIntegrity, FittedRegressor,
    Regressor,
};
use crate::error::{NutriError, Result};

/// Additive tree ensemble: `init + learning_rate * Σ tree(x)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedBoostedTrees {
    init: f64,
    learning_rate: f64,
    trees: Vec<FittedTree>,
    n_features_in: usize,
}

impl FittedBoostedTrees {
    pub fn n_stages(&self) -> usize {
        self.trees.len()
    }

    pub fn init(&self) -> f64 {
        self.init
    }
}

impl CheckIntegrity for FittedBoostedTrees {
    fn check_integrity(&self) -> Result<()> {
        check_finite([self.init, self.learning_rate], "boosting init or learning rate")?;
        check_trees(&self.trees, self.n_features_in)
    }
}

impl FittedRegressor for FittedBoostedTrees {
    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        check_features(self.n_features_in, &x)?;
        let mut out = Array1::from_elem(x.nrows(), self.init);
        for tree in &self.trees {
            out.scaled_add(self.learning_rate, &tree.predict_unchecked(x));
        }
        Ok(out)
    }
}

struct BoostingPlan<'a> {
    n_estimators: usize,
    learning_rate: f64,
    tree: &'a TreeParams,
    subsample: f64,
    colsample: f64,
    seed: u64,
}

fn boost(
    plan: BoostingPlan<'_>,
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<FittedBoostedTrees> {
    check_fit_inputs(&x, y.len())?;
    plan.tree.validate()?;
    if plan.n_estimators == 0 {
        return Err(NutriError::InvalidParameter(
            "n_estimators must be at least 1".into(),
        ));
    }
    if plan.learning_rate.is_nan() || plan.learning_rate <= 0.0 {
        return Err(NutriError::InvalidParameter(
            "learning_rate must be positive".into(),
        ));
    }

    let n = x.nrows();
    let p = x.ncols();
    let init = column_mean(y);
    let mut current = Array1::from_elem(n, init);
    let mut residuals = vec![0.0; n];
    let mut rng = StdRng::seed_from_u64(plan.seed);
    let n_rows = ((plan.subsample * n as f64).round() as usize).clamp(1, n);
    let n_cols = ((plan.colsample * p as f64).round() as usize).clamp(1, p);

    let mut trees = Vec::with_capacity(plan.n_estimators);
    for _ in 0..plan.n_estimators {
        for (r, (target, fitted)) in residuals.iter_mut().zip(y.iter().zip(current.iter())) {
            *r = target - fitted;
        }
        let rows: Vec<usize> = if n_rows < n {
            let mut rows = sample(&mut rng, n, n_rows).into_vec();
            rows.sort_unstable();
            rows
        } else {
            (0..n).collect()
        };
        let features: Vec<usize> = if n_cols < p {
            let mut cols = sample(&mut rng, p, n_cols).into_vec();
            cols.sort_unstable();
            cols
        } else {
            (0..p).collect()
        };

        let tree = grow_tree(x, &residuals, rows, &features, plan.tree, &mut rng);
        current.scaled_add(plan.learning_rate, &tree.predict_unchecked(x));
        trees.push(tree);
    }
    debug!(stages = trees.len(), init, "boosting finished");

    Ok(FittedBoostedTrees {
        init,
        learning_rate: plan.learning_rate,
        trees,
        n_features_in: p,
    })
}

/// Classic gradient boosting: depth-3 trees, learning rate 0.1, 100 stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
    pub subsample: f64,
    pub seed: u64,
}

impl Default for GradientBoostingRegressor {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            tree: TreeParams::default().with_max_depth(Some(3)),
            subsample: 1.0,
            seed: 42,
        }
    }
}

impl GradientBoostingRegressor {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Regressor for GradientBoostingRegressor {
    type Fitted = FittedBoostedTrees;

    fn name(&self) -> &'static str {
        "GradientBoosting"
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedBoostedTrees> {
        boost(
            BoostingPlan {
                n_estimators: self.n_estimators,
                learning_rate: self.learning_rate,
                tree: &self.tree,
                subsample: self.subsample,
                colsample: 1.0,
                seed: self.seed,
            },
            x,
            y,
        )
    }
}

impl Tunable for GradientBoostingRegressor {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        if self.tree.set_param(name, value)? {
            return Ok(());
        }
        match name {
            "n_estimators" => self.n_estimators = value.as_usize(name)?.max(1),
            "learning_rate" => self.learning_rate = value.as_positive_f64(name)?,
            "subsample" => self.subsample = value.as_fraction(name)?,
            _ => return Err(unknown_param("GradientBoosting", name)),
        }
        Ok(())
    }
}

/// Second-order style boosting with leaf regularization.
///
/// Defaults: depth 6, learning rate 0.3, `lambda = 1`, `gamma = 0`, 100 stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegularizedBoostingRegressor {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    /// Minimum gain for a split.
    pub gamma: f64,
    /// Minimum number of rows per leaf (hessian weight on squared loss).
    pub min_child_weight: usize,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub seed: u64,
}

impl Default for RegularizedBoostingRegressor {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            lambda: 1.0,
            gamma: 0.0,
            min_child_weight: 1,
            subsample: 1.0,
            colsample_bytree: 1.0,
            seed: 42,
        }
    }
}

impl RegularizedBoostingRegressor {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: Some(self.max_depth),
            min_samples_split: 2,
            min_samples_leaf: self.min_child_weight.max(1),
            max_features: MaxFeatures::All,
            lambda: self.lambda,
            // The gain above is twice the usual half-gain, so gamma doubles.
            min_split_gain: 2.0 * self.gamma,
        }
    }
}

impl Regressor for RegularizedBoostingRegressor {
    type Fitted = FittedBoostedTrees;

    fn name(&self) -> &'static str {
        "RegularizedBoosting"
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedBoostedTrees> {
        let tree = self.tree_params();
        boost(
            BoostingPlan {
                n_estimators: self.n_estimators,
                learning_rate: self.learning_rate,
                tree: &tree,
                subsample: self.subsample,
                colsample: self.colsample_bytree,
                seed: self.seed,
            },
            x,
            y,
        )
    }
}

impl Tunable for RegularizedBoostingRegressor {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "n_estimators" => self.n_estimators = value.as_usize(name)?.max(1),
            "learning_rate" => self.learning_rate = value.as_positive_f64(name)?,
            "max_depth" => self.max_depth = value.as_usize(name)?,
            "lambda" | "reg_lambda" => self.lambda = value.as_non_negative_f64(name)?,
            "gamma" => self.gamma = value.as_non_negative_f64(name)?,
            "min_child_weight" => self.min_child_weight = value.as_usize(name)?.max(1),
            "subsample" => self.subsample = value.as_fraction(name)?,
            "colsample_bytree" => self.colsample_bytree = value.as_fraction(name)?,
            _ => return Err(unknown_param("RegularizedBoosting", name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 2), |(i, j)| ((i * 7 + j * 3) % 23) as f64);
        let y = x.column(0).mapv(|v| 3.0 * v) + &x.column(1);
        (x, y)
    }

    fn mse(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        (a - b).mapv(|v| v * v).mean().unwrap()
    }

    #[test]
    fn test_gradient_boosting_reduces_error() {
        let (x, y) = linear_data();
        let baseline = Array1::from_elem(y.len(), y.mean().unwrap());
        let model = GradientBoostingRegressor::default()
            .fit(x.view(), y.view())
            .unwrap();
        let pred = model.predict(x.view()).unwrap();
        assert_eq!(model.n_stages(), 100);
        assert!(mse(&pred, &y) < 0.05 * mse(&baseline, &y));
    }

    #[test]
    fn test_single_stage_starts_from_mean() {
        let (x, y) = linear_data();
        let model = GradientBoostingRegressor::default()
            .with_n_estimators(1)
            .with_learning_rate(1e-9)
            .fit(x.view(), y.view())
            .unwrap();
        assert!((model.init() - y.mean().unwrap()).abs() < 1e-9);
        let pred = model.predict(x.view()).unwrap();
        assert!(pred.iter().all(|p| (p - model.init()).abs() < 1e-6));
    }

    #[test]
    fn test_regularized_boosting_fits_and_is_reproducible() {
        let (x, y) = linear_data();
        let model = RegularizedBoostingRegressor {
            subsample: 0.8,
            colsample_bytree: 0.5,
            ..Default::default()
        };
        let a = model.fit(x.view(), y.view()).unwrap();
        let b = model.fit(x.view(), y.view()).unwrap();
        let pa = a.predict(x.view()).unwrap();
        assert_eq!(pa, b.predict(x.view()).unwrap());
        let baseline = Array1::from_elem(y.len(), y.mean().unwrap());
        assert!(mse(&pa, &y) < 0.1 * mse(&baseline, &y));
    }

    #[test]
    fn test_large_gamma_prevents_splits() {
        let (x, y) = linear_data();
        let model = RegularizedBoostingRegressor {
            gamma: 1e12,
            n_estimators: 5,
            ..Default::default()
        };
        let fitted = model.fit(x.view(), y.view()).unwrap();
        let pred = fitted.predict(x.view()).unwrap();
        // Only root leaves: every row gets the same prediction.
        assert!(pred.iter().all(|p| (p - pred[0]).abs() < 1e-9));
    }

    #[test]
    fn test_params() {
        let mut gb = GradientBoostingRegressor::default();
        gb.set_param("max_depth", &ParamValue::Int(5)).unwrap();
        gb.set_param("learning_rate", &ParamValue::Float(0.05)).unwrap();
        assert_eq!(gb.tree.max_depth, Some(5));
        assert!(gb.set_param("learning_rate", &ParamValue::Float(0.0)).is_err());

        let mut rb = RegularizedBoostingRegressor::default();
        rb.set_param("reg_lambda", &ParamValue::Float(2.0)).unwrap();
        rb.set_param("colsample_bytree", &ParamValue::Float(0.5)).unwrap();
        assert_eq!(rb.lambda, 2.0);
        assert!(rb.set_param("depth", &ParamValue::Int(3)).is_err());
    }
}
