//! Per-disease median baseline.
//!
//! Predicts, for each target, the training median of the rows sharing the same
//! chronic-disease indicator. Rows with no active indicator form the baseline
//! category. Groups never seen in training fall back to the global median.

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::params::{unknown_param, ParamValue, Tunable};
use super::{
    check_features, check_finite, check_fit_inputs, corrupt, CheckIntegrity, FittedMultiRegressor,
    MultiRegressor,
};
use crate::error::{NutriError, Result};

/// Group key 0 is "no indicator active"; key `k > 0` is indicator column `k - 1`
/// of `group_columns`.
type GroupKey = usize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMedianBaseline {
    group_columns: Vec<usize>,
}

impl GroupMedianBaseline {
    /// `group_columns` are the feature indices of the one-hot group indicators.
    pub fn new(group_columns: Vec<usize>) -> Self {
        Self { group_columns }
    }

    pub fn group_columns(&self) -> &[usize] {
        &self.group_columns
    }
}

fn group_of(group_columns: &[usize], row: ArrayView1<'_, f64>) -> GroupKey {
    group_columns
        .iter()
        .position(|&c| row[c] > 0.5)
        .map_or(0, |i| i + 1)
}

/// Median with the two middle values averaged for even lengths.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn column_medians(y: ArrayView2<'_, f64>, rows: &[usize]) -> Vec<f64> {
    (0..y.ncols())
        .map(|t| {
            let mut values: Vec<f64> = rows.iter().map(|&r| y[[r, t]]).collect();
            median(&mut values)
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedGroupMedian {
    group_columns: Vec<usize>,
    medians: BTreeMap<GroupKey, Vec<f64>>,
    global: Vec<f64>,
    n_features_in: usize,
}

impl FittedGroupMedian {
    pub fn global_medians(&self) -> &[f64] {
        &self.global
    }
}

impl MultiRegressor for GroupMedianBaseline {
    type Fitted = FittedGroupMedian;

    fn fit_multi(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<FittedGroupMedian> {
        check_fit_inputs(&x, y.nrows())?;
        if let Some(&bad) = self.group_columns.iter().find(|&&c| c >= x.ncols()) {
            return Err(NutriError::InvalidParameter(format!(
                "group column {} out of range for {} features",
                bad,
                x.ncols()
            )));
        }

        let mut groups: BTreeMap<GroupKey, Vec<usize>> = BTreeMap::new();
        for (i, row) in x.rows().into_iter().enumerate() {
            groups
                .entry(group_of(&self.group_columns, row))
                .or_default()
                .push(i);
        }
        let all: Vec<usize> = (0..x.nrows()).collect();
        let medians = groups
            .iter()
            .map(|(&key, rows)| (key, column_medians(y, rows)))
            .collect();

        Ok(FittedGroupMedian {
            group_columns: self.group_columns.clone(),
            medians,
            global: column_medians(y, &all),
            n_features_in: x.ncols(),
        })
    }
}

impl FittedMultiRegressor for FittedGroupMedian {
    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn n_targets(&self) -> usize {
        self.global.len()
    }

    fn predict_multi(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        check_features(self.n_features_in, &x)?;
        let mut out = Array2::zeros((x.nrows(), self.global.len()));
        for (i, row) in x.rows().into_iter().enumerate() {
            let key = group_of(&self.group_columns, row);
            let medians = self.medians.get(&key).unwrap_or(&self.global);
            for (t, m) in medians.iter().enumerate() {
                out[[i, t]] = *m;
            }
        }
        Ok(out)
    }
}

impl CheckIntegrity for FittedGroupMedian {
    fn check_integrity(&self) -> Result<()> {
        if self.global.is_empty() {
            return Err(corrupt("baseline without targets"));
        }
        if let Some(&bad) = self.group_columns.iter().find(|&&c| c >= self.n_features_in) {
            return Err(corrupt(format!(
                "baseline groups on column {} of {}",
                bad, self.n_features_in
            )));
        }
        check_finite(self.global.iter().copied(), "baseline median")?;
        for medians in self.medians.values() {
            if medians.len() != self.global.len() {
                return Err(corrupt("baseline group medians disagree on the target count"));
            }
            check_finite(medians.iter().copied(), "baseline median")?;
        }
        Ok(())
    }
}

impl Tunable for GroupMedianBaseline {
    fn set_param(&mut self, name: &str, _value: &ParamValue) -> Result<()> {
        Err(unknown_param("BaselineMedian", name))
    }
}
