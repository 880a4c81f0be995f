//! Fits every candidate on a shared split and ranks them on held-out data.
//!
//! A [`Trainer`] owns the candidate list and the search seed. It can be reused
//! across splits; every call to [`Trainer::train_and_evaluate`] produces a
//! fresh [`Evaluation`] holding the leaderboard and the fitted models.

use ndarray::ArrayView2;
use tracing::{debug, info};

use crate::error::{NutriError, Result};
use crate::metrics::Metrics;
use crate::model::{FittedModel, FittedMultiRegressor, MultiRegressor};
use crate::search::{RandomizedSearch, SearchRecord};

pub mod candidates;
pub mod leaderboard;

pub use candidates::{Candidate, CandidateModel};
pub use leaderboard::{Leaderboard, LeaderboardEntry};

/// Result of evaluating a candidate set.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub leaderboard: Leaderboard,
    /// Fitted models in evaluation order, keyed by leaderboard name.
    pub models: Vec<(String, FittedModel)>,
    /// Search records of every tuned candidate.
    pub searches: Vec<(String, Vec<SearchRecord>)>,
}

impl Evaluation {
    pub fn model(&self, name: &str) -> Option<&FittedModel> {
        self.models.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Take the fitted model of `name` out of the evaluation.
    pub fn take_model(&mut self, name: &str) -> Option<FittedModel> {
        let pos = self.models.iter().position(|(n, _)| n == name)?;
        Some(self.models.swap_remove(pos).1)
    }
}

/// Fits and scores a list of candidates.
#[derive(Debug, Clone)]
pub struct Trainer {
    candidates: Vec<Candidate>,
    seed: u64,
}

impl Trainer {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            seed: 42,
        }
    }

    /// Seed for the randomized searches.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Fit each candidate on the training split, directly or through its
    /// randomized search, then score it on the test split.
    ///
    /// # Errors
    /// - [`NutriError::NoCandidates`] when the candidate list is empty
    /// - any fitting, search or metric error, which aborts the run
    pub fn train_and_evaluate(
        &self,
        x_train: ArrayView2<'_, f64>,
        y_train: ArrayView2<'_, f64>,
        x_test: ArrayView2<'_, f64>,
        y_test: ArrayView2<'_, f64>,
    ) -> Result<Evaluation> {
        if self.candidates.is_empty() {
            return Err(NutriError::NoCandidates);
        }
        info!(
            candidates = self.candidates.len(),
            train_rows = x_train.nrows(),
            test_rows = x_test.nrows(),
            "evaluating candidates"
        );

        let mut evaluation = Evaluation::default();
        for candidate in &self.candidates {
            let fitted = match &candidate.search {
                Some(spec) => {
                    let outcome = RandomizedSearch::new(spec.clone(), self.seed).fit(
                        &candidate.model,
                        x_train,
                        y_train,
                    )?;
                    debug!(
                        model = %candidate.name,
                        params = ?outcome.best_params,
                        cv_score = outcome.best_score,
                        "search selected parameters"
                    );
                    evaluation
                        .searches
                        .push((candidate.name.clone(), outcome.records));
                    outcome.fitted
                }
                None => candidate.model.fit_multi(x_train, y_train)?,
            };

            let pred = fitted.predict_multi(x_test)?;
            let metrics = Metrics::calculate_multi(y_test, pred.view())?;
            info!(
                model = %candidate.name,
                mae = metrics.mae,
                rmse = metrics.rmse,
                r2 = metrics.r2,
                "candidate evaluated"
            );
            evaluation
                .leaderboard
                .push(LeaderboardEntry::new(candidate.name.clone(), metrics));
            evaluation.models.push((candidate.name.clone(), fitted));
        }
        Ok(evaluation)
    }
}

/// Evaluate `candidates` on a shared split with the default search seed.
pub fn train_and_evaluate(
    x_train: ArrayView2<'_, f64>,
    y_train: ArrayView2<'_, f64>,
    x_test: ArrayView2<'_, f64>,
    y_test: ArrayView2<'_, f64>,
    candidates: Vec<Candidate>,
) -> Result<Evaluation> {
    Trainer::new(candidates).train_and_evaluate(x_train, y_train, x_test, y_test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Estimator, GroupMedianBaseline, LinearRegression, MultiOutputRegressor,
        RandomForestRegressor,
    };
    use crate::search::SearchSpec;
    use ndarray::Array2;

    // y = (2a + b, a - b, a/2 + 1) with a group indicator in column 2.
    fn data(n: usize, offset: usize) -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => ((i + offset) % 11) as f64,
            1 => ((i + offset) * 3 % 7) as f64,
            _ => ((i + offset) % 2) as f64,
        });
        let y = Array2::from_shape_fn((n, 3), |(i, t)| match t {
            0 => 2.0 * x[[i, 0]] + x[[i, 1]],
            1 => x[[i, 0]] - x[[i, 1]],
            _ => 0.5 * x[[i, 0]] + 1.0,
        });
        (x, y)
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new(
                "BaselineMedian",
                CandidateModel::Baseline(GroupMedianBaseline::new(vec![2])),
            ),
            Candidate::new(
                "LinearRegression",
                CandidateModel::Linear(LinearRegression::default()),
            ),
            Candidate::new(
                "RandomForest",
                CandidateModel::PerTarget(MultiOutputRegressor::new(Estimator::RandomForest(
                    RandomForestRegressor::default(),
                ))),
            )
            .with_search(SearchSpec::new(2, 3).with_values("n_estimators", [5i64, 10])),
        ]
    }

    #[test]
    fn test_every_candidate_gets_an_entry_in_order() {
        let (x_train, y_train) = data(60, 0);
        let (x_test, y_test) = data(20, 60);
        let evaluation = train_and_evaluate(
            x_train.view(),
            y_train.view(),
            x_test.view(),
            y_test.view(),
            candidates(),
        )
        .unwrap();

        let names: Vec<&str> = evaluation
            .leaderboard
            .entries()
            .iter()
            .map(|e| e.model.as_str())
            .collect();
        assert_eq!(names, vec!["BaselineMedian", "LinearRegression", "RandomForest"]);
        assert_eq!(evaluation.models.len(), 3);
        assert_eq!(evaluation.searches.len(), 1);
        assert_eq!(evaluation.searches[0].1.len(), 2);
    }

    #[test]
    fn test_linear_data_selects_linear_model() {
        let (x_train, y_train) = data(60, 0);
        let (x_test, y_test) = data(20, 60);
        let mut evaluation = Trainer::new(candidates())
            .seed(7)
            .train_and_evaluate(x_train.view(), y_train.view(), x_test.view(), y_test.view())
            .unwrap();

        let best = evaluation.leaderboard.best().unwrap().model.clone();
        assert_eq!(best, "LinearRegression");
        let model = evaluation.take_model(&best).unwrap();
        assert_eq!(model.n_targets(), 3);
        assert!(evaluation.model(&best).is_none());
    }

    #[test]
    fn test_empty_candidates() {
        let (x, y) = data(10, 0);
        let result = train_and_evaluate(x.view(), y.view(), x.view(), y.view(), Vec::new());
        assert!(matches!(result, Err(NutriError::NoCandidates)));
    }
}
