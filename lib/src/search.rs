//! Randomized hyperparameter search with k-fold cross-validation.
//!
//! A search space maps parameter names to lists of candidate values. When the
//! full grid has at most `n_iter` combinations every combination is tried;
//! otherwise `n_iter` distinct combinations are drawn with a seeded RNG. Every
//! `(combination, fold)` fit is an independent job on the rayon pool, and all
//! jobs are joined before the best combination is chosen and refit on the full
//! training split.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::dataset::split::{select_rows, KFold};
use crate::error::{NutriError, Result};
use crate::metrics::Metrics;
use crate::model::{FittedMultiRegressor, MultiRegressor, ParamSet, ParamValue, Tunable};

/// Objective maximized by the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    NegMeanSquaredError,
    #[default]
    R2,
}

impl Scoring {
    /// Higher is better for every variant.
    pub fn score(&self, y_true: ArrayView2<'_, f64>, y_pred: ArrayView2<'_, f64>) -> Result<f64> {
        let m = Metrics::calculate_multi(y_true, y_pred)?;
        Ok(match self {
            Scoring::NegMeanSquaredError => -m.mse,
            Scoring::R2 => m.r2,
        })
    }
}

/// Search settings for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchSpec {
    pub n_iter: usize,
    pub cv: usize,
    pub scoring: Scoring,
    pub space: BTreeMap<String, Vec<ParamValue>>,
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self {
            n_iter: 10,
            cv: 3,
            scoring: Scoring::R2,
            space: BTreeMap::new(),
        }
    }
}

impl SearchSpec {
    pub fn new(n_iter: usize, cv: usize) -> Self {
        Self {
            n_iter,
            cv,
            ..Default::default()
        }
    }

    pub fn with_scoring(mut self, scoring: Scoring) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_values<I, V>(mut self, param: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ParamValue>,
    {
        self.space
            .insert(param.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_iter == 0 {
            return Err(NutriError::Config("search n_iter must be at least 1".into()));
        }
        if self.cv < 2 {
            return Err(NutriError::Config(format!(
                "search cv must be at least 2, got {}",
                self.cv
            )));
        }
        if let Some((name, _)) = self.space.iter().find(|(_, v)| v.is_empty()) {
            return Err(NutriError::Config(format!(
                "search space for {} has no values",
                name
            )));
        }
        Ok(())
    }

    /// Number of combinations in the full grid (saturating).
    pub fn grid_size(&self) -> usize {
        self.space
            .values()
            .fold(1usize, |acc, v| acc.saturating_mul(v.len()))
    }

    /// Decode grid index `idx` (mixed radix over the sorted parameter names).
    fn combination(&self, mut idx: usize) -> ParamSet {
        let mut params = ParamSet::new();
        for (name, values) in self.space.iter().rev() {
            let n = values.len();
            params.insert(name.clone(), values[idx % n].clone());
            idx /= n;
        }
        params
    }

    /// Combinations to evaluate, in evaluation order.
    pub fn combinations(&self, seed: u64) -> Vec<ParamSet> {
        let grid = self.grid_size();
        if grid <= self.n_iter {
            return (0..grid).map(|i| self.combination(i)).collect();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        sample(&mut rng, grid, self.n_iter)
            .into_iter()
            .map(|i| self.combination(i))
            .collect()
    }
}

/// Cross-validation result of one parameter combination.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub params: ParamSet,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    /// 1 is best; ties share the smaller rank.
    pub rank: usize,
}

/// Outcome of a search: the refit winner plus every combination's record.
#[derive(Debug, Clone)]
pub struct SearchOutcome<F> {
    pub best_params: ParamSet,
    pub best_score: f64,
    pub records: Vec<SearchRecord>,
    pub fitted: F,
}

/// Randomized search over a [`SearchSpec`].
#[derive(Debug, Clone)]
pub struct RandomizedSearch {
    spec: SearchSpec,
    seed: u64,
}

fn mean_std(scores: &[f64]) -> (f64, f64) {
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn comparable(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

impl RandomizedSearch {
    pub fn new(spec: SearchSpec, seed: u64) -> Self {
        Self { spec, seed }
    }

    pub fn spec(&self) -> &SearchSpec {
        &self.spec
    }

    /// Run the search for `template` on `(x, y)` and refit the winner.
    pub fn fit<M>(
        &self,
        template: &M,
        x: ArrayView2<'_, f64>,
        y: ArrayView2<'_, f64>,
    ) -> Result<SearchOutcome<M::Fitted>>
    where
        M: MultiRegressor + Tunable,
    {
        self.spec.validate()?;
        let combos = self.spec.combinations(self.seed);
        let models = combos
            .iter()
            .map(|params| template.with_params(params))
            .collect::<Result<Vec<M>>>()?;
        let folds = KFold::new(self.spec.cv)?.split(x.nrows())?;
        info!(
            combinations = combos.len(),
            folds = folds.len(),
            fits = combos.len() * folds.len(),
            "starting randomized search"
        );

        let jobs: Vec<(usize, usize)> = (0..models.len())
            .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
            .collect();
        let scores = jobs
            .par_iter()
            .map(|&(c, f)| {
                let fold = &folds[f];
                let fitted = models[c].fit_multi(
                    select_rows(x, &fold.train).view(),
                    select_rows(y, &fold.train).view(),
                )?;
                let pred = fitted.predict_multi(select_rows(x, &fold.test).view())?;
                let score = self
                    .spec
                    .scoring
                    .score(select_rows(y, &fold.test).view(), pred.view())?;
                debug!(combination = c, fold = f, score, "fold scored");
                Ok(score)
            })
            .collect::<Result<Vec<f64>>>()?;

        let mut records: Vec<SearchRecord> = combos
            .into_iter()
            .zip(scores.chunks(folds.len()))
            .map(|(params, fold_scores)| {
                let (mean_score, std_score) = mean_std(fold_scores);
                SearchRecord {
                    params,
                    fold_scores: fold_scores.to_vec(),
                    mean_score,
                    std_score,
                    rank: 0,
                }
            })
            .collect();
        let means: Vec<f64> = records.iter().map(|r| comparable(r.mean_score)).collect();
        for (record, &mean) in records.iter_mut().zip(&means) {
            record.rank = 1 + means.iter().filter(|&&m| m > mean).count();
        }

        let best = (0..records.len())
            .reduce(|best, i| if means[i] > means[best] { i } else { best })
            .ok_or(NutriError::NoCandidates)?;
        let best_params = records[best].params.clone();
        let best_score = records[best].mean_score;
        info!(params = ?best_params, score = best_score, "search finished, refitting best");
        let fitted = models[best].fit_multi(x, y)?;

        Ok(SearchOutcome {
            best_params,
            best_score,
            records,
            fitted,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SearchResultRow {
    rank_test_score: usize,
    mean_test_score: f64,
    std_test_score: f64,
    params: String,
}

/// Write one row per combination, best first.
pub fn write_search_results<P: AsRef<Path>>(path: P, records: &[SearchRecord]) -> Result<()> {
    let mut sorted: Vec<&SearchRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.rank);
    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for record in sorted {
        writer.serialize(SearchResultRow {
            rank_test_score: record.rank,
            mean_test_score: record.mean_score,
            std_test_score: record.std_score,
            params: serde_json::to_string(&record.params)?,
        })?;
    }
    writer.flush()?;
    Ok(())
}
