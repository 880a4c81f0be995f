//! End-to-end demo: synthetic patients -> leaderboard -> artifact -> predictions.
//!
//! Run with: cargo run --example train_and_predict

use nutripredict::config::TrainingConfig;
use nutripredict::dataset::{synthetic, PatientRecord};
use nutripredict::inference::{InferenceService, PredictionRequest};
use nutripredict::pipeline::TrainingPipeline;
use nutripredict::registry::ModelRegistry;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    println!("=== NutriCare macro prediction ===\n");

    // 1. Data
    let dataset = synthetic::generate(400, 42);
    println!("Generated {} patients with columns {:?}\n", dataset.len(), dataset.columns());

    // 2. Train every candidate plus the stacking ensemble
    let dir = std::env::temp_dir().join("nutripredict-demo");
    let registry = ModelRegistry::open(&dir)?;
    let report = TrainingPipeline::new(TrainingConfig::default().with_stacking_cv(3))
        .run(&dataset, &registry)?;
    println!("{}", report.leaderboard);
    println!("Selected {} (R2 {:.4})", report.best_model, report.best_metrics.r2);
    println!("Artifact at {}\n", report.artifact.path().display());

    // 3. Serve from the persisted artifact
    let service = InferenceService::open(&registry)?;
    println!("Schema: {:?}\n", service.schema().names());

    let request = PredictionRequest::new()
        .with("Age", 25)
        .with("BMI", 22.9)
        .with("Carb_ratio", 0.40)
        .with("Protein_ratio", 0.30)
        .with("Fat_ratio", 0.30);
    let result = service.predict(&request)?;
    println!(
        "Feature request -> protein {:.1} g, carbs {:.1} g, fat {:.1} g, {:.0} kcal",
        result.protein, result.carbs, result.fat, result.calories
    );

    let record = PatientRecord::new()
        .with_number("Age", 52.0)
        .with_text("Gender", "Female")
        .with_text("Chronic_Disease", "diabetes")
        .with_number("Height_cm", 165.0)
        .with_number("Weight_kg", 78.0)
        .with_number("Recommended_Carbs", 180.0)
        .with_number("Recommended_Protein", 95.0)
        .with_number("Recommended_Fats", 70.0);
    let result = service.predict_record(&record)?;
    println!(
        "Patient record  -> protein {:.1} g, carbs {:.1} g, fat {:.1} g, {:.0} kcal",
        result.protein, result.carbs, result.fat, result.calories
    );

    Ok(())
}
