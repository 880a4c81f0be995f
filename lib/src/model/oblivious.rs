//! Boosting over oblivious (symmetric) trees.
//!
//! Every level of an oblivious tree applies the same `(feature, border)` test
//! to all nodes, so a tree of depth `d` is just `d` tests and `2^d` leaf
//! values, and a row's leaf index is the bit pattern of its test outcomes.
//! Candidate borders are quantiles of each feature computed once before
//! boosting, which keeps split search to a histogram pass per level.
//!
//! With `rsm < 1` each tree only searches a seeded random subset of the
//! features.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::params::{unknown_param, ParamValue, Tunable};
use super::{
    check_features, check_finite, check_fit_inputs, column_mean, corrupt, CheckIntegrity,
    FittedRegressor, Regressor,
};
use crate::error::{NutriError, Result};

/// Oblivious boosting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObliviousBoostingRegressor {
    pub iterations: usize,
    pub learning_rate: f64,
    pub depth: usize,
    pub l2_leaf_reg: f64,
    /// Maximum number of candidate borders per feature.
    pub border_count: usize,
    /// Fraction of features each tree may split on.
    pub rsm: f64,
    /// Seeds the per-tree feature subsets.
    pub seed: u64,
}

impl Default for ObliviousBoostingRegressor {
    fn default() -> Self {
        Self {
            iterations: 300,
            learning_rate: 0.05,
            depth: 6,
            l2_leaf_reg: 3.0,
            border_count: 32,
            rsm: 1.0,
            seed: 42,
        }
    }
}

impl ObliviousBoostingRegressor {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_rsm(mut self, rsm: f64) -> Self {
        self.rsm = rsm;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(NutriError::InvalidParameter(
                "iterations must be at least 1".into(),
            ));
        }
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(NutriError::InvalidParameter(format!(
                "depth must be in 1..={}, got {}",
                MAX_DEPTH, self.depth
            )));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(NutriError::InvalidParameter(
                "learning_rate must be positive".into(),
            ));
        }
        if self.l2_leaf_reg < 0.0 {
            return Err(NutriError::InvalidParameter(
                "l2_leaf_reg must be non-negative".into(),
            ));
        }
        if !(self.rsm > 0.0 && self.rsm <= 1.0) {
            return Err(NutriError::InvalidParameter(format!(
                "rsm must be in (0, 1], got {}",
                self.rsm
            )));
        }
        if self.border_count == 0 || self.border_count > u16::MAX as usize {
            return Err(NutriError::InvalidParameter(format!(
                "border_count must be in 1..={}",
                u16::MAX
            )));
        }
        Ok(())
    }
}

/// One symmetric tree: level tests plus `2^levels` leaf values (already scaled
/// by the learning rate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTree {
    splits: Vec<(usize, f64)>,
    leaves: Vec<f64>,
}

impl ObliviousTree {
    fn leaf_index(&self, row: ArrayView1<'_, f64>) -> usize {
        self.splits
            .iter()
            .fold(0, |idx, &(feature, border)| {
                (idx << 1) | usize::from(row[feature] > border)
            })
    }

    pub fn depth(&self) -> usize {
        self.splits.len()
    }
}

/// Deepest tree a decoded model may carry.
const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedObliviousBoosting {
    init: f64,
    trees: Vec<ObliviousTree>,
    n_features_in: usize,
}

impl FittedObliviousBoosting {
    pub fn trees(&self) -> &[ObliviousTree] {
        &self.trees
    }
}

impl FittedRegressor for FittedObliviousBoosting {
    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        check_features(self.n_features_in, &x)?;
        Ok(x.rows()
            .into_iter()
            .map(|row| {
                self.init
                    + self
                        .trees
                        .iter()
                        .map(|t| t.leaves[t.leaf_index(row)])
                        .sum::<f64>()
            })
            .collect())
    }
}

impl CheckIntegrity for FittedObliviousBoosting {
    fn check_integrity(&self) -> Result<()> {
        check_finite([self.init], "boosting init")?;
        if self.trees.is_empty() {
            return Err(corrupt("ensemble without trees"));
        }
        for tree in &self.trees {
            if tree.splits.len() > MAX_DEPTH || tree.leaves.len() != 1usize << tree.splits.len() {
                return Err(corrupt(format!(
                    "oblivious tree of depth {} with {} leaves",
                    tree.splits.len(),
                    tree.leaves.len()
                )));
            }
            for &(feature, border) in &tree.splits {
                if feature >= self.n_features_in {
                    return Err(corrupt(format!(
                        "oblivious split on feature {} of {}",
                        feature, self.n_features_in
                    )));
                }
                check_finite([border], "split border")?;
            }
            check_finite(tree.leaves.iter().copied(), "leaf value")?;
        }
        Ok(())
    }
}

/// Quantile borders of one feature column, strictly increasing.
pub(crate) fn quantile_borders(column: ArrayView1<'_, f64>, border_count: usize) -> Vec<f64> {
    let mut values: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    if values.len() < 2 {
        return Vec::new();
    }
    let midpoint = |i: usize| values[i - 1] + (values[i] - values[i - 1]) / 2.0;

    let mut borders: Vec<f64> = if values.len() <= border_count + 1 {
        (1..values.len()).map(midpoint).collect()
    } else {
        (1..=border_count)
            .map(|k| midpoint((k * values.len() / (border_count + 1)).max(1)))
            .collect()
    };
    borders.dedup();
    borders
}

/// Per-feature bin index of every row: the number of borders below the value.
struct Binned {
    borders: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl Binned {
    fn new(x: ArrayView2<'_, f64>, border_count: usize) -> Self {
        let mut borders = Vec::with_capacity(x.ncols());
        let mut bins = Vec::with_capacity(x.ncols());
        for column in x.columns() {
            let b = quantile_borders(column, border_count);
            let col_bins = column
                .iter()
                .map(|&v| b.partition_point(|&border| border < v) as u16)
                .collect();
            borders.push(b);
            bins.push(col_bins);
        }
        Self { borders, bins }
    }
}

fn leaf_score(sum: f64, count: f64, l2: f64) -> f64 {
    if count == 0.0 {
        0.0
    } else {
        sum * sum / (count + l2)
    }
}

impl Regressor for ObliviousBoostingRegressor {
    type Fitted = FittedObliviousBoosting;

    fn name(&self) -> &'static str {
        "ObliviousBoosting"
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedObliviousBoosting> {
        check_fit_inputs(&x, y.len())?;
        self.validate()?;

        let n = x.nrows();
        let binned = Binned::new(x, self.border_count);
        let init = column_mean(y);
        let mut current = vec![init; n];
        let mut residuals = vec![0.0; n];
        let mut leaf_of = vec![0usize; n];
        let mut trees = Vec::with_capacity(self.iterations);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n_features = x.ncols();
        let n_sampled = ((self.rsm * n_features as f64).ceil() as usize).clamp(1, n_features);

        for _ in 0..self.iterations {
            for i in 0..n {
                residuals[i] = y[i] - current[i];
            }
            leaf_of.iter_mut().for_each(|l| *l = 0);
            let features: Vec<usize> = if n_sampled < n_features {
                let mut picked = sample(&mut rng, n_features, n_sampled).into_vec();
                picked.sort_unstable();
                picked
            } else {
                (0..n_features).collect()
            };

            let mut splits = Vec::with_capacity(self.depth);
            for level in 0..self.depth {
                let n_leaves = 1usize << level;
                let Some((feature, border_idx)) =
                    self.best_level_split(&binned, &features, &residuals, &leaf_of, n_leaves)
                else {
                    break;
                };
                let bins = &binned.bins[feature];
                for i in 0..n {
                    leaf_of[i] = (leaf_of[i] << 1) | usize::from(bins[i] as usize > border_idx);
                }
                splits.push((feature, binned.borders[feature][border_idx]));
            }

            let n_leaves = 1usize << splits.len();
            let mut sums = vec![0.0; n_leaves];
            let mut counts = vec![0.0; n_leaves];
            for i in 0..n {
                sums[leaf_of[i]] += residuals[i];
                counts[leaf_of[i]] += 1.0;
            }
            let leaves: Vec<f64> = sums
                .iter()
                .zip(&counts)
                .map(|(s, c)| {
                    if *c == 0.0 {
                        0.0
                    } else {
                        self.learning_rate * s / (c + self.l2_leaf_reg)
                    }
                })
                .collect();
            for i in 0..n {
                current[i] += leaves[leaf_of[i]];
            }
            trees.push(ObliviousTree { splits, leaves });
        }
        debug!(iterations = trees.len(), init, "oblivious boosting finished");

        Ok(FittedObliviousBoosting {
            init,
            trees,
            n_features_in: x.ncols(),
        })
    }
}

impl ObliviousBoostingRegressor {
    /// Best `(feature, border index)` applied to every current leaf, or `None`
    /// if no test improves the regularized score.
    fn best_level_split(
        &self,
        binned: &Binned,
        features: &[usize],
        residuals: &[f64],
        leaf_of: &[usize],
        n_leaves: usize,
    ) -> Option<(usize, usize)> {
        let l2 = self.l2_leaf_reg;
        let mut leaf_sum = vec![0.0; n_leaves];
        let mut leaf_count = vec![0.0; n_leaves];
        for (i, &leaf) in leaf_of.iter().enumerate() {
            leaf_sum[leaf] += residuals[i];
            leaf_count[leaf] += 1.0;
        }
        let parent: f64 = (0..n_leaves)
            .map(|l| leaf_score(leaf_sum[l], leaf_count[l], l2))
            .sum();

        let mut best: Option<(usize, usize, f64)> = None;
        for &feature in features {
            let borders = &binned.borders[feature];
            if borders.is_empty() {
                continue;
            }
            let n_bins = borders.len() + 1;
            let mut hist_sum = vec![0.0; n_leaves * n_bins];
            let mut hist_count = vec![0.0; n_leaves * n_bins];
            for (i, &bin) in binned.bins[feature].iter().enumerate() {
                let slot = leaf_of[i] * n_bins + bin as usize;
                hist_sum[slot] += residuals[i];
                hist_count[slot] += 1.0;
            }

            let mut left_sum = vec![0.0; n_leaves];
            let mut left_count = vec![0.0; n_leaves];
            for border_idx in 0..borders.len() {
                let mut score = 0.0;
                for leaf in 0..n_leaves {
                    let slot = leaf * n_bins + border_idx;
                    left_sum[leaf] += hist_sum[slot];
                    left_count[leaf] += hist_count[slot];
                    score += leaf_score(left_sum[leaf], left_count[leaf], l2)
                        + leaf_score(
                            leaf_sum[leaf] - left_sum[leaf],
                            leaf_count[leaf] - left_count[leaf],
                            l2,
                        );
                }
                let gain = score - parent;
                if gain > 1e-12 * parent.abs().max(1.0)
                    && best.map_or(true, |(_, _, g)| gain > g)
                {
                    best = Some((feature, border_idx, gain));
                }
            }
        }
        best.map(|(f, b, _)| (f, b))
    }
}

impl Tunable for ObliviousBoostingRegressor {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match name {
            "iterations" | "n_estimators" => self.iterations = value.as_usize(name)?.max(1),
            "learning_rate" => self.learning_rate = value.as_positive_f64(name)?,
            "depth" | "max_depth" => self.depth = value.as_usize(name)?.clamp(1, MAX_DEPTH),
            "l2_leaf_reg" => self.l2_leaf_reg = value.as_non_negative_f64(name)?,
            "border_count" => self.border_count = value.as_usize(name)?.clamp(1, 1024),
            "rsm" => self.rsm = value.as_fraction(name)?,
            _ => return Err(unknown_param("ObliviousBoosting", name)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_quantile_borders() {
        let col = array![3.0, 1.0, 2.0, 2.0, 4.0];
        assert_eq!(quantile_borders(col.view(), 32), vec![1.5, 2.5, 3.5]);

        let many = Array1::from_iter((0..100).map(|i| i as f64));
        let borders = quantile_borders(many.view(), 4);
        assert_eq!(borders.len(), 4);
        assert!(borders.windows(2).all(|w| w[0] < w[1]));

        assert!(quantile_borders(array![5.0, 5.0].view(), 8).is_empty());
    }

    #[test]
    fn test_leaf_index_bits() {
        let tree = ObliviousTree {
            splits: vec![(0, 0.5), (1, 0.5)],
            leaves: vec![0.0, 1.0, 2.0, 3.0],
        };
        assert_eq!(tree.leaf_index(array![0.0, 0.0].view()), 0);
        assert_eq!(tree.leaf_index(array![0.0, 1.0].view()), 1);
        assert_eq!(tree.leaf_index(array![1.0, 0.0].view()), 2);
        assert_eq!(tree.leaf_index(array![1.0, 1.0].view()), 3);
    }

    #[test]
    fn test_fits_interaction() {
        // y depends on both features jointly.
        let x = Array2::from_shape_fn((64, 2), |(i, j)| ((i >> j) & 1) as f64);
        let y = x
            .rows()
            .into_iter()
            .map(|r| 10.0 * r[0] + 5.0 * r[1])
            .collect::<Array1<f64>>();
        let model = ObliviousBoostingRegressor {
            iterations: 200,
            learning_rate: 0.2,
            depth: 2,
            ..Default::default()
        };
        let fitted = model.fit(x.view(), y.view()).unwrap();
        let pred = fitted.predict(array![[0.0, 0.0], [1.0, 1.0]].view()).unwrap();
        assert!((pred[0] - 0.0).abs() < 0.5, "got {}", pred[0]);
        assert!((pred[1] - 15.0).abs() < 0.5, "got {}", pred[1]);
        assert!(fitted.trees().iter().all(|t| t.depth() <= 2));
    }

    #[test]
    fn test_constant_features_give_mean() {
        let x = Array2::from_elem((10, 3), 1.0);
        let y = Array1::from_iter((0..10).map(|i| i as f64));
        let fitted = ObliviousBoostingRegressor::default()
            .with_iterations(5)
            .fit(x.view(), y.view())
            .unwrap();
        let pred = fitted.predict(x.view()).unwrap();
        assert!(pred.iter().all(|p| (p - 4.5).abs() < 1e-9));
    }

    #[test]
    fn test_rsm_subsets_follow_the_seed() {
        let x = Array2::from_shape_fn((48, 6), |(i, j)| ((i * (j + 3)) % 11) as f64);
        let y = x.column(2).mapv(|v| 3.0 * v) + x.column(4);
        let model = ObliviousBoostingRegressor {
            iterations: 20,
            depth: 2,
            rsm: 0.5,
            ..Default::default()
        };
        let a = model.fit(x.view(), y.view()).unwrap();
        let b = model.fit(x.view(), y.view()).unwrap();
        assert_eq!(a.trees(), b.trees());

        let c = model.clone().with_seed(7).fit(x.view(), y.view()).unwrap();
        assert_ne!(a.trees(), c.trees());

        // Without subsampling the seed has nothing to drive.
        let full = model.with_rsm(1.0);
        let d = full.fit(x.view(), y.view()).unwrap();
        let e = full.with_seed(7).fit(x.view(), y.view()).unwrap();
        assert_eq!(d.trees(), e.trees());
    }

    #[test]
    fn test_integrity_rejects_damaged_trees() {
        let x = Array2::from_shape_fn((32, 2), |(i, j)| ((i >> j) & 1) as f64);
        let y = x.column(0).to_owned();
        let fitted = ObliviousBoostingRegressor {
            iterations: 3,
            depth: 2,
            ..Default::default()
        }
        .fit(x.view(), y.view())
        .unwrap();
        fitted.check_integrity().unwrap();

        let mut short_leaves = fitted.clone();
        short_leaves.trees[0].leaves.pop();
        assert!(matches!(short_leaves.check_integrity(), Err(NutriError::ModelLoad(_))));

        let mut bad_feature = fitted;
        bad_feature.trees[0].splits[0].0 = 5;
        assert!(bad_feature.check_integrity().is_err());
    }

    #[test]
    fn test_params() {
        let mut m = ObliviousBoostingRegressor::default();
        m.set_param("depth", &ParamValue::Int(4)).unwrap();
        m.set_param("l2_leaf_reg", &ParamValue::Float(1.0)).unwrap();
        m.set_param("rsm", &ParamValue::Float(0.5)).unwrap();
        assert_eq!(m.depth, 4);
        assert_eq!(m.rsm, 0.5);
        assert!(m.set_param("rsm", &ParamValue::Float(1.5)).is_err());
        assert!(m.set_param("gamma", &ParamValue::Float(1.0)).is_err());
    }
}
