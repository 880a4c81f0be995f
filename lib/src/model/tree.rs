//! CART regression trees on squared error.
//!
//! Trees are the building block of every ensemble in this crate. Splits are
//! chosen by exhaustive search over midpoints between consecutive distinct
//! feature values, scoring each candidate with
//! `S_l²/(n_l+λ) + S_r²/(n_r+λ) - S²/(n+λ)` where `S` is the sum of targets in
//! a node. With `λ = 0` this is exactly the reduction in squared error; with
//! `λ > 0` it is the regularized gain used by second-order boosting on squared
//! loss. Leaves predict `S/(n+λ)`.

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::params::{unknown_param, MaxFeatures, ParamValue, Tunable};
use super::{
    check_features, check_finite, check_fit_inputs, corrupt, CheckIntegrity, FittedRegressor,
    Regressor,
};
use crate::error::{NutriError, Result};

/// Growth limits shared by all tree-based models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    /// `None` grows until leaves are pure or too small to split.
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    /// Minimum gain a split must exceed.
    pub min_split_gain: f64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            lambda: 0.0,
            min_split_gain: 0.0,
        }
    }
}

impl TreeParams {
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n.max(1);
        self
    }

    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.min_samples_split < 2 {
            return Err(NutriError::InvalidParameter(
                "min_samples_split must be at least 2".into(),
            ));
        }
        if self.min_samples_leaf == 0 {
            return Err(NutriError::InvalidParameter(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        if self.lambda < 0.0 || self.min_split_gain < 0.0 {
            return Err(NutriError::InvalidParameter(
                "lambda and min_split_gain must be non-negative".into(),
            ));
        }
        Ok(())
    }

    /// Shared setter for the growth parameters; `Ok(false)` if `name` is not one.
    pub(crate) fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<bool> {
        match name {
            "max_depth" => self.max_depth = value.as_opt_usize(name)?,
            "min_samples_split" => self.min_samples_split = value.as_usize(name)?.max(2),
            "min_samples_leaf" => self.min_samples_leaf = value.as_usize(name)?.max(1),
            "max_features" => self.max_features = MaxFeatures::from_param(value, name)?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A grown tree stored as a flat node arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedTree {
    nodes: Vec<Node>,
    n_features_in: usize,
}

impl FittedTree {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    pub(crate) fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    /// Prediction without the width check; callers validate once per batch.
    pub(crate) fn predict_unchecked(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

impl FittedRegressor for FittedTree {
    fn n_features_in(&self) -> usize {
        self.n_features_in
    }

    fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        check_features(self.n_features_in, &x)?;
        Ok(self.predict_unchecked(x))
    }
}

impl CheckIntegrity for FittedTree {
    fn check_integrity(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(corrupt("tree without nodes"));
        }
        let n = self.nodes.len();
        for (idx, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Leaf { value } => check_finite([value], "leaf value")?,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= self.n_features_in {
                        return Err(corrupt(format!(
                            "node {} splits on feature {} of {}",
                            idx, feature, self.n_features_in
                        )));
                    }
                    check_finite([threshold], "split threshold")?;
                    // Children are always stored after their parent.
                    if left <= idx || right <= idx || left >= n || right >= n {
                        return Err(corrupt(format!(
                            "node {} has children {} and {} in a tree of {} nodes",
                            idx, left, right, n
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Integrity of an ensemble's trees, all reading `n_features_in` columns.
pub(crate) fn check_trees(trees: &[FittedTree], n_features_in: usize) -> Result<()> {
    if trees.is_empty() {
        return Err(corrupt("ensemble without trees"));
    }
    for tree in trees {
        if tree.n_features_in != n_features_in {
            return Err(corrupt(format!(
                "tree reads {} features, ensemble reads {}",
                tree.n_features_in, n_features_in
            )));
        }
        tree.check_integrity()?;
    }
    Ok(())
}

/// Grow a tree on the rows `rows` of `x` against `targets` (indexed like `x`).
///
/// `features` is the pool split candidates are drawn from; `max_features`
/// subsamples it again at every node.
pub(crate) fn grow_tree(
    x: ArrayView2<'_, f64>,
    targets: &[f64],
    rows: Vec<usize>,
    features: &[usize],
    params: &TreeParams,
    rng: &mut StdRng,
) -> FittedTree {
    let mut builder = Builder {
        x,
        targets,
        features,
        params,
        rng,
        nodes: Vec::new(),
        order: Vec::new(),
    };
    builder.grow(rows, 0);
    FittedTree {
        nodes: builder.nodes,
        n_features_in: x.ncols(),
    }
}

struct Builder<'a, 'x, 'r> {
    x: ArrayView2<'x, f64>,
    targets: &'a [f64],
    features: &'a [usize],
    params: &'a TreeParams,
    rng: &'r mut StdRng,
    nodes: Vec<Node>,
    order: Vec<usize>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Builder<'_, '_, '_> {
    fn leaf_score(&self, sum: f64, n: usize) -> f64 {
        sum * sum / (n as f64 + self.params.lambda)
    }

    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let sum: f64 = rows.iter().map(|&r| self.targets[r]).sum();
        let n = rows.len();
        self.nodes.push(Node::Leaf {
            value: sum / (n as f64 + self.params.lambda),
        });

        if self.params.max_depth.is_some_and(|d| depth >= d)
            || n < self.params.min_samples_split
            || n < 2 * self.params.min_samples_leaf
        {
            return idx;
        }

        let Some(best) = self.best_split(&rows, sum) else {
            return idx;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.x[[r, best.feature]] <= best.threshold);

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(&mut self, rows: &[usize], sum: f64) -> Option<BestSplit> {
        let n = rows.len();
        let parent = self.leaf_score(sum, n);
        let min_leaf = self.params.min_samples_leaf;

        let n_candidates = self.params.max_features.resolve(self.features.len());
        let candidates: Vec<usize> = if n_candidates >= self.features.len() {
            self.features.to_vec()
        } else {
            let mut picked: Vec<usize> = sample(&mut *self.rng, self.features.len(), n_candidates)
                .into_iter()
                .map(|i| self.features[i])
                .collect();
            picked.sort_unstable();
            picked
        };

        let mut best: Option<BestSplit> = None;
        for feature in candidates {
            self.order.clear();
            self.order.extend_from_slice(rows);
            let x = self.x;
            self.order
                .sort_by(|&a, &b| x[[a, feature]].total_cmp(&x[[b, feature]]));

            let mut left_sum = 0.0;
            for i in 0..n - 1 {
                let r = self.order[i];
                left_sum += self.targets[r];
                let left_n = i + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }
                let here = x[[r, feature]];
                let next = x[[self.order[i + 1], feature]];
                if here == next {
                    continue;
                }
                let gain = self.leaf_score(left_sum, left_n)
                    + self.leaf_score(sum - left_sum, right_n)
                    - parent;
                if gain > self.params.min_split_gain
                    && gain > 1e-12 * parent.abs().max(1.0)
                    && best.as_ref().map_or(true, |b| gain > b.gain)
                {
                    let mut threshold = here + (next - here) / 2.0;
                    if threshold >= next {
                        threshold = here;
                    }
                    best = Some(BestSplit {
                        feature,
                        threshold,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// A single regression tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    pub params: TreeParams,
    pub seed: u64,
}

impl Default for DecisionTreeRegressor {
    fn default() -> Self {
        Self {
            params: TreeParams::default(),
            seed: 42,
        }
    }
}

impl DecisionTreeRegressor {
    pub fn new(params: TreeParams) -> Self {
        Self { params, seed: 42 }
    }
}

impl Regressor for DecisionTreeRegressor {
    type Fitted = FittedTree;

    fn name(&self) -> &'static str {
        "DecisionTree"
    }

    fn fit(&self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<FittedTree> {
        check_fit_inputs(&x, y.len())?;
        self.params.validate()?;
        let targets: Vec<f64> = y.to_vec();
        let features: Vec<usize> = (0..x.ncols()).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);
        Ok(grow_tree(
            x,
            &targets,
            (0..x.nrows()).collect(),
            &features,
            &self.params,
            &mut rng,
        ))
    }
}

impl Tunable for DecisionTreeRegressor {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        if self.params.set_param(name, value)? {
            return Ok(());
        }
        Err(unknown_param("DecisionTree", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_step_function_is_learned_exactly() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = array![5.0, 5.0, 5.0, 20.0, 20.0, 20.0];
        let tree = DecisionTreeRegressor::default()
            .fit(x.view(), y.view())
            .unwrap();
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.depth(), 1);
        let pred = tree.predict(array![[0.0], [6.4], [6.6], [100.0]].view()).unwrap();
        assert_eq!(pred.to_vec(), vec![5.0, 5.0, 20.0, 20.0]);
        match tree.nodes()[0] {
            Node::Split { threshold, .. } => assert_eq!(threshold, 6.5),
            _ => panic!("root should split"),
        }
    }

    #[test]
    fn test_max_depth_limits_growth() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = array![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let tree = DecisionTreeRegressor::new(TreeParams::default().with_max_depth(Some(2)))
            .fit(x.view(), y.view())
            .unwrap();
        assert!(tree.depth() <= 2);
        assert!(tree.n_leaves() <= 4);
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let y = array![7.0, 7.0, 7.0];
        let tree = DecisionTreeRegressor::default()
            .fit(x.view(), y.view())
            .unwrap();
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict(x.view()).unwrap().to_vec(), vec![7.0; 3]);
    }

    #[test]
    fn test_lambda_shrinks_leaves() {
        let x = array![[0.0], [1.0]];
        let y = array![4.0, 4.0];
        let tree = DecisionTreeRegressor::new(TreeParams::default().with_lambda(2.0))
            .fit(x.view(), y.view())
            .unwrap();
        // sum 8 over 2 samples + lambda 2
        assert_eq!(tree.predict(array![[0.5]].view()).unwrap()[0], 2.0);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![0.0, 0.0, 0.0, 0.0, 100.0];
        let tree = DecisionTreeRegressor::new(TreeParams::default().with_min_samples_leaf(2))
            .fit(x.view(), y.view())
            .unwrap();
        // The outlier cannot sit alone in a leaf.
        let pred = tree.predict(array![[5.0]].view()).unwrap();
        assert!(pred[0] < 100.0);
    }

    #[test]
    fn test_integrity_rejects_damaged_nodes() {
        let x = array![[1.0], [2.0], [10.0], [11.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let tree = DecisionTreeRegressor::default()
            .fit(x.view(), y.view())
            .unwrap();
        tree.check_integrity().unwrap();

        let mut bad_feature = tree.clone();
        if let Node::Split { feature, .. } = &mut bad_feature.nodes[0] {
            *feature = 7;
        }
        assert!(matches!(bad_feature.check_integrity(), Err(NutriError::ModelLoad(_))));

        let mut cycle = tree.clone();
        if let Node::Split { left, .. } = &mut cycle.nodes[0] {
            *left = 0;
        }
        assert!(cycle.check_integrity().is_err());

        let mut nan_leaf = tree;
        nan_leaf.nodes[1] = Node::Leaf { value: f64::NAN };
        assert!(nan_leaf.check_integrity().is_err());
    }

    #[test]
    fn test_rejects_empty_input() {
        let x = ndarray::Array2::<f64>::zeros((0, 2));
        let y = ndarray::Array1::<f64>::zeros(0);
        assert!(DecisionTreeRegressor::default()
            .fit(x.view(), y.view())
            .is_err());
    }
}
