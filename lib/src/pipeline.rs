//! End-to-end training: dataset in, current artifact and leaderboard out.
//!
//! [`TrainingPipeline::evaluate`] scores the persisted artifact on the same
//! held-out split the training run used.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::TrainingConfig;
use crate::dataset::split::select_rows;
use crate::dataset::{train_test_split, PatientDataset, TARGET_COLUMNS};
use crate::error::{NutriError, Result};
use crate::features;
use crate::metrics::{per_target_report, Metrics, RegressionMetrics, TargetReport};
use crate::model::{FittedModel, FittedMultiRegressor};
use crate::registry::{ArtifactHandle, ModelArtifact, ModelRegistry};
use crate::search::write_search_results;
use crate::stacking::{evaluate_stacking, StackingEnsemble, StackingReport};
use crate::trainer::{candidates, Evaluation, Leaderboard, Trainer};

/// What a training run produced.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub leaderboard: Leaderboard,
    pub best_model: String,
    pub best_metrics: RegressionMetrics,
    pub artifact: ArtifactHandle,
    pub leaderboard_path: PathBuf,
    pub search_results: Vec<PathBuf>,
}

/// Held-out evaluation of a persisted artifact.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub model: String,
    /// Number of held-out rows scored.
    pub rows: usize,
    pub overall: RegressionMetrics,
    pub targets: Vec<TargetReport>,
}

impl EvaluationReport {
    /// One CSV row per target.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        for target in &self.targets {
            writer.serialize(target)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_csv(file)
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} on {} held-out rows: MAE {:.2} g, RMSE {:.2} g, R2 {:.4}",
            self.model, self.rows, self.overall.mae, self.overall.rmse, self.overall.r2
        )?;
        let width = self
            .targets
            .iter()
            .map(|t| t.target.len())
            .max()
            .unwrap_or(6)
            .max(6);
        writeln!(
            f,
            "{:<width$}  {:>8}  {:>8}  {:>7}  {:>7}  {:>7}  {:>8}  {:>8}  {:>8}",
            "Target",
            "MAE",
            "RMSE",
            "R2",
            "MAPE%",
            "ExpVar",
            "Bias",
            "MedAE",
            "P95AE",
            width = width
        )?;
        for t in &self.targets {
            writeln!(
                f,
                "{:<width$}  {:>8.2}  {:>8.2}  {:>7.4}  {:>7.2}  {:>7.4}  {:>8.2}  {:>8.2}  {:>8.2}",
                t.target,
                t.mae,
                t.rmse,
                t.r2,
                t.mape,
                t.explained_variance,
                t.bias,
                t.median_abs_error,
                t.p95_abs_error,
                width = width
            )?;
        }
        Ok(())
    }
}

/// Feature engineering, candidate evaluation, stacking, selection and
/// persistence as one batch run.
#[derive(Debug, Clone, Default)]
pub struct TrainingPipeline {
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Run the pipeline and make the winner the registry's current artifact.
    ///
    /// The leaderboard is written whatever wins. Any error aborts the run
    /// before the artifact is replaced.
    pub fn run(&self, dataset: &PatientDataset, registry: &ModelRegistry) -> Result<TrainingReport> {
        let config = &self.config;
        config.validate()?;
        if dataset.is_empty() {
            return Err(NutriError::EmptyData("training dataset has no rows".into()));
        }

        let y = dataset.targets()?;
        let (engineer, matrix) = features::engineer(dataset)?;
        let x = matrix.values();
        info!(
            rows = x.nrows(),
            features = x.ncols(),
            schema = ?matrix.schema().names(),
            "engineered training matrix"
        );

        let split = train_test_split(x.nrows(), config.test_size, config.seed)?;
        let x_train = select_rows(x.view(), &split.train);
        let y_train = select_rows(y.view(), &split.train);
        let x_test = select_rows(x.view(), &split.test);
        let y_test = select_rows(y.view(), &split.test);
        info!(train = split.train.len(), test = split.test.len(), seed = config.seed, "split dataset");

        let candidates = candidates::from_config(config, matrix.schema())?;
        let mut evaluation = if candidates.is_empty() {
            Evaluation::default()
        } else {
            Trainer::new(candidates).seed(config.seed).train_and_evaluate(
                x_train.view(),
                y_train.view(),
                x_test.view(),
                y_test.view(),
            )?
        };

        if config.include_stacking {
            let ensemble = StackingEnsemble::default()
                .with_cv(config.stacking_cv)
                .with_seed(config.seed);
            let report = evaluate_stacking(
                &ensemble,
                x_train.view(),
                y_train.view(),
                x_test.view(),
                y_test.view(),
                &TARGET_COLUMNS,
            )?;
            evaluation.leaderboard.extend(report.entries);
            evaluation
                .models
                .push((StackingReport::aggregate_name(), FittedModel::Stacking(report.fitted)));
        }

        info!("leaderboard:\n{}", evaluation.leaderboard);
        let best = evaluation
            .leaderboard
            .best()
            .cloned()
            .ok_or(NutriError::NoCandidates)?;
        let model = evaluation.take_model(&best.model).ok_or_else(|| {
            NutriError::ModelLoad(format!("no fitted model recorded for {}", best.model))
        })?;
        info!(model = %best.model, kind = model.kind(), r2 = best.metrics.r2, "selected best model");

        let artifact = ModelArtifact::new(best.model.clone(), matrix.schema().clone(), model)?
            .with_features(engineer)?
            .with_metrics(best.metrics);
        let leaderboard_path = registry.persist_leaderboard(&evaluation.leaderboard)?;

        let mut search_results = Vec::new();
        if config.write_search_results {
            for (name, records) in &evaluation.searches {
                let path = registry.search_results_path(name);
                write_search_results(&path, records)?;
                search_results.push(path);
            }
        }

        let handle = registry.persist(&artifact)?;
        Ok(TrainingReport {
            leaderboard: evaluation.leaderboard,
            best_model: best.model,
            best_metrics: best.metrics,
            artifact: handle,
            leaderboard_path,
            search_results,
        })
    }

    /// Score the registry's current artifact per target on the held-out rows
    /// of `dataset`, split with this pipeline's seed and test size.
    ///
    /// Rows are engineered with the artifact's own feature engineer when it
    /// carries one; otherwise a freshly fitted schema must match the artifact's.
    pub fn evaluate(&self, dataset: &PatientDataset, registry: &ModelRegistry) -> Result<EvaluationReport> {
        let config = &self.config;
        config.validate()?;
        if dataset.is_empty() {
            return Err(NutriError::EmptyData("evaluation dataset has no rows".into()));
        }

        let artifact = registry.load_current()?;
        let y = dataset.targets()?;
        let matrix = match artifact.features() {
            Some(engineer) => engineer.transform(dataset)?,
            None => {
                let (_, matrix) = features::engineer(dataset)?;
                if matrix.schema() != artifact.schema() {
                    return Err(NutriError::FeatureMismatch {
                        expected: artifact.schema().len(),
                        got: matrix.schema().len(),
                    });
                }
                matrix
            }
        };
        let x = matrix.values();

        let split = train_test_split(x.nrows(), config.test_size, config.seed)?;
        let x_test = select_rows(x.view(), &split.test);
        let y_test = select_rows(y.view(), &split.test);
        let y_pred = artifact.model().predict_multi(x_test.view())?;

        let overall = Metrics::calculate_multi(y_test.view(), y_pred.view())?;
        let targets = per_target_report(y_test.view(), y_pred.view(), &TARGET_COLUMNS)?;
        for t in &targets {
            info!(
                target_name = %t.target,
                mae = t.mae,
                rmse = t.rmse,
                r2 = t.r2,
                mape = t.mape,
                "evaluated target"
            );
        }
        Ok(EvaluationReport {
            model: artifact.model_name().to_string(),
            rows: split.test.len(),
            overall,
            targets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic;
    use crate::inference::{InferenceService, PredictionRequest};
    use crate::search::SearchSpec;
    use crate::trainer::candidates::{BASELINE_MEDIAN, LINEAR_REGRESSION, RANDOM_FOREST};

    fn quick_config() -> TrainingConfig {
        TrainingConfig::default()
            .with_candidates([LINEAR_REGRESSION, RANDOM_FOREST])
            .without_search()
            .with_search(
                RANDOM_FOREST,
                SearchSpec::new(2, 2).with_values("n_estimators", [5i64, 10]),
            )
            .with_stacking(false)
    }

    #[test]
    fn test_run_persists_best_model_and_leaderboard() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let dataset = synthetic::generate(150, 3);

        let report = TrainingPipeline::new(quick_config())
            .run(&dataset, &registry)
            .unwrap();

        let names: Vec<&str> = report
            .leaderboard
            .entries()
            .iter()
            .map(|e| e.model.as_str())
            .collect();
        assert_eq!(names, vec![BASELINE_MEDIAN, LINEAR_REGRESSION, RANDOM_FOREST]);
        assert_eq!(
            report.best_model,
            report.leaderboard.best().unwrap().model
        );
        assert!(report.leaderboard_path.exists());
        assert_eq!(report.search_results.len(), 1);
        assert!(report.search_results[0].exists());

        let artifact = registry.load(&report.artifact).unwrap();
        assert_eq!(artifact.model_name(), report.best_model);
        assert!(artifact.features().is_some());

        let service = InferenceService::open(&registry).unwrap();
        let result = service
            .predict(&PredictionRequest::new().with("Age", 25).with("BMI", 22.9))
            .unwrap();
        assert!(result.calories.is_finite());
    }

    #[test]
    fn test_stacking_rows_are_listed_and_only_aggregate_is_selectable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let dataset = synthetic::generate(120, 5);
        let config = quick_config()
            .with_candidates(Vec::<String>::new())
            .with_stacking(true)
            .with_stacking_cv(3);

        let report = TrainingPipeline::new(config).run(&dataset, &registry).unwrap();
        let board = &report.leaderboard;
        assert!(board.get("StackingEnsemble_All").unwrap().selectable);
        assert!(!board.get("StackingEnsemble_Recommended_Protein").unwrap().selectable);
        assert!(board.get("rf_Recommended_Fats").is_some());
        assert!(report.best_model == "StackingEnsemble_All" || report.best_model == BASELINE_MEDIAN);
    }

    #[test]
    fn test_evaluate_scores_the_persisted_model_on_the_held_out_split() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let dataset = synthetic::generate(150, 3);
        let pipeline = TrainingPipeline::new(quick_config());
        let training = pipeline.run(&dataset, &registry).unwrap();

        let report = pipeline.evaluate(&dataset, &registry).unwrap();
        assert_eq!(report.model, training.best_model);
        let config = pipeline.config();
        let held_out = train_test_split(dataset.len(), config.test_size, config.seed).unwrap();
        assert_eq!(report.rows, held_out.test.len());
        let names: Vec<&str> = report.targets.iter().map(|t| t.target.as_str()).collect();
        assert_eq!(names, TARGET_COLUMNS.to_vec());

        // Same split and model as the leaderboard row that won.
        assert!((report.overall.mae - training.best_metrics.mae).abs() < 1e-9);
        assert!((report.overall.r2 - training.best_metrics.r2).abs() < 1e-9);
        let mean_mae = report.targets.iter().map(|t| t.mae).sum::<f64>() / 3.0;
        assert!((mean_mae - report.overall.mae).abs() < 1e-9);

        let path = dir.path().join("evaluation.csv");
        report.save_to_file(&path).unwrap();
        let csv = std::fs::read_to_string(&path).unwrap();
        assert!(csv.starts_with("target,mae,rmse,r2,mape,explained_variance"));
        assert_eq!(csv.lines().count(), 4);
        assert!(report.to_string().contains("Recommended_Protein"));
    }

    #[test]
    fn test_evaluate_without_artifact_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let err = TrainingPipeline::new(quick_config())
            .evaluate(&synthetic::generate(20, 1), &registry)
            .unwrap_err();
        assert!(matches!(err, NutriError::ModelLoad(_)));
    }

    #[test]
    fn test_missing_target_column_aborts_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::open(dir.path()).unwrap();
        let dataset = PatientDataset::from_records(vec![
            crate::dataset::PatientRecord::new().with_number("Age", 30.0),
        ]);
        let err = TrainingPipeline::new(quick_config())
            .run(&dataset, &registry)
            .unwrap_err();
        assert!(matches!(err, NutriError::MissingColumn(_)));
        assert!(!registry.current().path().exists());
    }
}
