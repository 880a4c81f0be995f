//! One independent single-target model per output column.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::params::{ParamValue, Tunable};
use super::{
    check_fit_inputs, corrupt, stack_columns, CheckIntegrity, FittedMultiRegressor,
    FittedRegressor, MultiRegressor, Regressor,
};
use crate::error::{NutriError, Result};

/// Wraps a [`Regressor`] so it can be fitted on a target matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiOutputRegressor<R> {
    estimator: R,
}

impl<R: Regressor> MultiOutputRegressor<R> {
    pub fn new(estimator: R) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &R {
        &self.estimator
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedMultiOutput<F> {
    estimators: Vec<F>,
}

impl<F> FittedMultiOutput<F> {
    pub fn estimators(&self) -> &[F] {
        &self.estimators
    }
}

impl<R: Regressor> MultiRegressor for MultiOutputRegressor<R> {
    type Fitted = FittedMultiOutput<R::Fitted>;

    fn fit_multi(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<Self::Fitted> {
        check_fit_inputs(&x, y.nrows())?;
        if y.ncols() == 0 {
            return Err(NutriError::EmptyData("no target columns".into()));
        }
        let estimators = (0..y.ncols())
            .into_par_iter()
            .map(|t| self.estimator.fit(x, y.column(t)))
            .collect::<Result<Vec<_>>>()?;
        Ok(FittedMultiOutput { estimators })
    }
}

impl<F: FittedRegressor> FittedMultiRegressor for FittedMultiOutput<F> {
    fn n_features_in(&self) -> usize {
        self.estimators
            .first()
            .map(FittedRegressor::n_features_in)
            .unwrap_or(0)
    }

    fn n_targets(&self) -> usize {
        self.estimators.len()
    }

    fn predict_multi(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let columns = self
            .estimators
            .iter()
            .map(|e| e.predict(x))
            .collect::<Result<Vec<_>>>()?;
        Ok(stack_columns(x.nrows(), columns))
    }
}

impl<F: FittedRegressor + CheckIntegrity> CheckIntegrity for FittedMultiOutput<F> {
    fn check_integrity(&self) -> Result<()> {
        let Some(first) = self.estimators.first() else {
            return Err(corrupt("multi-output model without estimators"));
        };
        let width = first.n_features_in();
        for estimator in &self.estimators {
            if estimator.n_features_in() != width {
                return Err(corrupt("per-target estimators disagree on the input width"));
            }
            estimator.check_integrity()?;
        }
        Ok(())
    }
}

impl<R: Regressor + Tunable> Tunable for MultiOutputRegressor<R> {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        self.estimator.set_param(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Estimator, LinearRegression};
    use ndarray::array;

    #[test]
    fn test_one_model_per_column() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![[0.0, 10.0], [2.0, 9.0], [4.0, 8.0], [6.0, 7.0]];
        let model = MultiOutputRegressor::new(Estimator::Linear(LinearRegression::new()));
        let fitted = model.fit_multi(x.view(), y.view()).unwrap();
        assert_eq!(fitted.n_targets(), 2);
        assert_eq!(fitted.n_features_in(), 1);
        let pred = fitted.predict_multi(array![[4.0]].view()).unwrap();
        assert!((pred[[0, 0]] - 8.0).abs() < 1e-6);
        assert!((pred[[0, 1]] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_tuning_reaches_inner_estimator() {
        let mut model = MultiOutputRegressor::new(Estimator::Linear(LinearRegression::new()));
        model.set_param("alpha", &ParamValue::Float(1.0)).unwrap();
        match model.estimator() {
            Estimator::Linear(l) => assert_eq!(l.alpha, 1.0),
            _ => unreachable!(),
        }
    }
}
