//! `nutripredict` command line: train, evaluate, predict, serve, leaderboard.

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use nutripredict::dataset::PatientRecord;
use nutripredict::inference::InferenceService;
use nutripredict::registry::{ModelRegistry, LEADERBOARD_FILE};
use nutripredict::{
    logging, Leaderboard, NutriError, PatientDataset, Result, TrainingConfig, TrainingPipeline,
};

#[derive(Parser, Debug)]
#[command(name = "nutripredict")]
#[command(about = "Macronutrient recommendation models", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train every candidate, persist the best model and the leaderboard
    Train {
        /// Cleaned dataset (CSV with header)
        #[arg(short, long)]
        data: PathBuf,

        /// Registry directory for the artifact and reports
        #[arg(short, long, default_value = "models")]
        output: PathBuf,

        /// Training config (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        test_size: Option<f64>,

        /// Skip the stacking ensemble
        #[arg(long)]
        no_stacking: bool,
    },

    /// Score the current artifact per macro on the held-out split
    Evaluate {
        /// Cleaned dataset (CSV with header)
        #[arg(short, long)]
        data: PathBuf,

        /// Registry directory holding the current artifact
        #[arg(short, long, default_value = "models")]
        models: PathBuf,

        /// Training config (JSON) whose seed and test size define the split
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        test_size: Option<f64>,
    },

    /// Predict from one JSON request
    Predict {
        /// Registry directory holding the current artifact
        #[arg(short, long, default_value = "models")]
        models: PathBuf,

        /// JSON object, `@file`, or `-` for stdin (the default)
        input: Option<String>,

        /// Treat the input as a raw patient record (Gender, Chronic_Disease, macros)
        #[arg(long)]
        record: bool,
    },

    /// Answer newline-delimited JSON requests from stdin, one response per line
    Serve {
        #[arg(short, long, default_value = "models")]
        models: PathBuf,

        #[arg(long)]
        record: bool,
    },

    /// Print a persisted leaderboard
    Leaderboard {
        /// Leaderboard CSV, or a registry directory
        #[arg(default_value = "models")]
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose, cli.json_logs) {
        eprintln!("{}", e);
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Train {
            data,
            output,
            config,
            seed,
            test_size,
            no_stacking,
        } => {
            let mut config = load_config(config, seed, test_size)?;
            if no_stacking {
                config = config.with_stacking(false);
            }

            let dataset = PatientDataset::from_csv_path(&data)?;
            let registry = ModelRegistry::open(&output)?;
            let report = TrainingPipeline::new(config).run(&dataset, &registry)?;
            println!("{}", report.leaderboard);
            println!(
                "best: {} (R2 {:.4}) -> {}",
                report.best_model,
                report.best_metrics.r2,
                report.artifact.path().display()
            );
            Ok(())
        }
        Command::Evaluate {
            data,
            models,
            config,
            seed,
            test_size,
        } => {
            let config = load_config(config, seed, test_size)?;
            let dataset = PatientDataset::from_csv_path(&data)?;
            let registry = ModelRegistry::open(&models)?;
            let report = TrainingPipeline::new(config).evaluate(&dataset, &registry)?;
            let path = registry.evaluation_path();
            report.save_to_file(&path)?;
            print!("{}", report);
            println!("report: {}", path.display());
            Ok(())
        }
        Command::Predict {
            models,
            input,
            record,
        } => {
            let service = InferenceService::open(&ModelRegistry::open(models)?)?;
            let body = read_input(input.as_deref())?;
            println!("{}", answer(&service, &body, record)?);
            Ok(())
        }
        Command::Serve { models, record } => {
            let service = InferenceService::open(&ModelRegistry::open(models)?)?;
            tracing::info!(model = %service.model_name(), features = service.schema().len(), "serving");
            let stdin = io::stdin();
            let mut stdout = io::stdout().lock();
            for line in stdin.lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let response = answer(&service, &line, record).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "request failed");
                    serde_json::json!({ "error": e.to_string() }).to_string()
                });
                writeln!(stdout, "{}", response)?;
                stdout.flush()?;
            }
            Ok(())
        }
        Command::Leaderboard { path } => {
            let path = if path.is_dir() {
                path.join(LEADERBOARD_FILE)
            } else {
                path
            };
            print!("{}", Leaderboard::load_from_file(path)?);
            Ok(())
        }
    }
}

fn load_config(
    path: Option<PathBuf>,
    seed: Option<u64>,
    test_size: Option<f64>,
) -> Result<TrainingConfig> {
    let mut config = match path {
        Some(path) => TrainingConfig::from_file(path)?,
        None => TrainingConfig::default(),
    };
    if let Some(seed) = seed {
        config = config.with_seed(seed);
    }
    if let Some(test_size) = test_size {
        config = config.with_test_size(test_size);
    }
    Ok(config)
}

fn answer(service: &InferenceService, body: &str, record: bool) -> Result<String> {
    if !record {
        return service.predict_json(body);
    }
    let value: serde_json::Value = serde_json::from_str(body)?;
    let map = value
        .as_object()
        .ok_or_else(|| NutriError::InvalidParameter("record must be a JSON object".into()))?;
    let result = service.predict_record(&PatientRecord::from_json_map(map))?;
    Ok(serde_json::to_string(&result)?)
}

fn read_input(input: Option<&str>) -> Result<String> {
    match input {
        None | Some("-") => {
            let mut body = String::new();
            io::stdin().read_to_string(&mut body)?;
            Ok(body)
        }
        Some(arg) => match arg.strip_prefix('@') {
            Some(path) => Ok(std::fs::read_to_string(path)?),
            None => Ok(arg.to_string()),
        },
    }
}
