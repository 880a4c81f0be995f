//! The candidate models compared on the leaderboard.

use ndarray::ArrayView2;

use crate::config::TrainingConfig;
use crate::dataset::columns;
use crate::error::{NutriError, Result};
use crate::features::FeatureSchema;
use crate::model::{
    Estimator, FittedModel, GradientBoostingRegressor, GroupMedianBaseline, LinearRegression,
    MultiOutputRegressor, MultiRegressor, ObliviousBoostingRegressor, ParamValue,
    RandomForestRegressor, RegularizedBoostingRegressor, Tunable,
};
use crate::search::SearchSpec;

pub const BASELINE_MEDIAN: &str = "BaselineMedian";
pub const LINEAR_REGRESSION: &str = "LinearRegression";
pub const RANDOM_FOREST: &str = "RandomForest";
pub const GRADIENT_BOOSTING: &str = "GradientBoosting";
pub const REGULARIZED_BOOSTING: &str = "RegularizedBoosting";
pub const OBLIVIOUS_BOOSTING: &str = "ObliviousBoosting";

/// Every known candidate, in default evaluation order.
pub const CANDIDATE_NAMES: [&str; 6] = [
    BASELINE_MEDIAN,
    LINEAR_REGRESSION,
    RANDOM_FOREST,
    GRADIENT_BOOSTING,
    REGULARIZED_BOOSTING,
    OBLIVIOUS_BOOSTING,
];

/// An unfitted multi-target model.
#[derive(Debug, Clone)]
pub enum CandidateModel {
    Baseline(GroupMedianBaseline),
    Linear(LinearRegression),
    PerTarget(MultiOutputRegressor<Estimator>),
}

impl MultiRegressor for CandidateModel {
    type Fitted = FittedModel;

    fn fit_multi(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>) -> Result<FittedModel> {
        Ok(match self {
            CandidateModel::Baseline(m) => FittedModel::Baseline(m.fit_multi(x, y)?),
            CandidateModel::Linear(m) => FittedModel::Linear(m.fit_multi(x, y)?),
            CandidateModel::PerTarget(m) => FittedModel::PerTarget(m.fit_multi(x, y)?),
        })
    }
}

impl Tunable for CandidateModel {
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        match self {
            CandidateModel::Baseline(m) => m.set_param(name, value),
            CandidateModel::Linear(m) => m.set_param(name, value),
            CandidateModel::PerTarget(m) => m.set_param(name, value),
        }
    }
}

/// A named model, optionally tuned by randomized search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub model: CandidateModel,
    pub search: Option<SearchSpec>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, model: CandidateModel) -> Self {
        Self {
            name: name.into(),
            model,
            search: None,
        }
    }

    pub fn with_search(mut self, spec: SearchSpec) -> Self {
        self.search = Some(spec);
        self
    }

    /// Build a candidate by name. The baseline groups rows by the
    /// chronic-disease indicator columns of `schema`.
    pub fn from_name(name: &str, schema: &FeatureSchema, seed: u64) -> Result<Self> {
        let per_target = |est: Estimator| {
            CandidateModel::PerTarget(MultiOutputRegressor::new(est.with_seed(seed)))
        };
        let model = match name {
            BASELINE_MEDIAN => CandidateModel::Baseline(GroupMedianBaseline::new(
                schema.indices_with_prefix(&format!("{}_", columns::CHRONIC_DISEASE)),
            )),
            LINEAR_REGRESSION => CandidateModel::Linear(LinearRegression::default()),
            RANDOM_FOREST => per_target(Estimator::RandomForest(RandomForestRegressor::default())),
            GRADIENT_BOOSTING => {
                per_target(Estimator::GradientBoosting(GradientBoostingRegressor::default()))
            }
            REGULARIZED_BOOSTING => per_target(Estimator::RegularizedBoosting(
                RegularizedBoostingRegressor::default(),
            )),
            OBLIVIOUS_BOOSTING => {
                per_target(Estimator::ObliviousBoosting(ObliviousBoostingRegressor::default()))
            }
            other => {
                return Err(NutriError::Config(format!("unknown candidate {}", other)));
            }
        };
        Ok(Self::new(name, model))
    }
}

/// The candidates a config asks for, with their search settings attached.
pub fn from_config(config: &TrainingConfig, schema: &FeatureSchema) -> Result<Vec<Candidate>> {
    let mut names: Vec<&str> = config.candidates.iter().map(String::as_str).collect();
    if config.include_baseline && !names.contains(&BASELINE_MEDIAN) {
        names.insert(0, BASELINE_MEDIAN);
    }

    let mut candidates = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = Candidate::from_name(name, schema, config.seed)?;
        if let Some(spec) = config.search.get(name) {
            candidate = candidate.with_search(spec.clone());
        }
        candidates.push(candidate);
    }
    Ok(candidates)
}
