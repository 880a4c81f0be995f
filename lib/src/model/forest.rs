//! Bagged regression trees.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::params::{unknown_param, ParamValue, Tunable};
use super::tree::{check_trees, grow_tree, FittedTree, TreeParams};
use super::{check_features, check_fit_inputs, CheckIntegrity, FittedRegressor, Regressor};
use crate::error::{NutriError, Result};

/// Random forest configuration.
///
/// Each tree is grown on a bootstrap sample of the rows with its own RNG
/// seeded from `seed + tree_index`, so the forest is reproducible no matter
/// how rayon schedules the trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub n_estimators: usize,
    pub tree: TreeParams,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for RandomForestRegressor {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            tree: TreeParams::default(),
            bootstrap: true,
            seed: 42,
        }
    }
}

impl RandomForestRegressor {
    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_tree_params(mut self, tree: TreeParams) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedRandomForest {
    trees: Vec<FittedTree>,
    n_features_in: usize,
}

impl FittedRandomForest {
    pub fn trees(&self) -> &[FittedTree] {
        &self.trees
    }
}

impl Regressor for RandomForestRegressor {
    type Fitted = FittedRandomForest;

    fn name(&self) -> &'static str {
        "RandomForest"
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedRandomForest> {
        check_fit_inputs(&x, y.len())?;
        self.tree.validate()?;
        if self.n_estimators == 0 {
            return Err(NutriError::InvalidParameter(
                "n_estimators must be at least 1".into(),
            ));
        }

        let n = x.nrows();
        let targets = y.to_vec();
        let features: Vec<usize> = (0..x.ncols()).collect();

        let trees: Vec<FittedTree> = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let rows: Vec<usize> = if self.bootstrap {
                    (0..n).map(|_| rng.random_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                grow_tree(x, &targets, rows, &features, &self.tree, &mut rng)
            })
            .collect();

        Ok(FittedRandomForest {
            trees,
            n_features_in: x.ncols(),
        })
    }
}

impl FittedRegressor for FittedRandomForest {
    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        check_features(self.n_features_in, &x)?;
        let mut sum = Array1::zeros(x.nrows());
        for tree in &self.trees {
            sum += &tree.predict_unchecked(x);
        }
        Ok(sum / self.trees.len() as f64)
    }
}

impl CheckIntegrity for FittedRandomForest {
    fn check_integrity(&self) -> Result<()> {
        check_trees(&self.trees, self.n_features_in)
    }
}

impl Tunable for RandomForestRegressor {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        if self.tree.set_param(name, value)? {
            return Ok(());
        }
        match name {
            "n_estimators" => self.n_estimators = value.as_usize(name)?.max(1),
            "bootstrap" => self.bootstrap = value.as_bool(name)?,
            _ => return Err(unknown_param("RandomForest", name)),
        }
        Ok(())
    }
}
