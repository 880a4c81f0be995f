//! Synthetic patient tables for demos, tests and benchmarks.
//!
//! Generated rows follow the column layout of the cleaned dataset. Targets are
//! a smooth function of weight, age, gender and disease plus gaussian noise, so
//! learned models have real signal to find.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{columns, PatientDataset, PatientRecord};

const GENDERS: [&str; 2] = ["Female", "Male"];
const DISEASES: [&str; 4] = ["none", "diabetes", "hypertension", "heart_disease"];

/// Generate `n_samples` records deterministically from `seed`.
pub fn generate(n_samples: usize, seed: u64) -> PatientDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let records = (0..n_samples).map(|_| sample_record(&mut rng)).collect();
    PatientDataset::from_records(records)
}

fn sample_record(rng: &mut StdRng) -> PatientRecord {
    let age = rng.random_range(18.0..80.0_f64).round();
    let gender = GENDERS[rng.random_range(0..GENDERS.len())];
    let disease = DISEASES[rng.random_range(0..DISEASES.len())];
    let male = gender == "Male";

    let height_cm: f64 = if male {
        rng.random_range(160.0..195.0)
    } else {
        rng.random_range(150.0..180.0)
    };
    let weight_kg: f64 = rng.random_range(48.0..115.0);
    let height_m = height_cm / 100.0;
    let bmi = weight_kg / (height_m * height_m);

    let (protein_adj, carb_adj, fat_adj) = match disease {
        "diabetes" => (8.0, -45.0, 4.0),
        "hypertension" => (0.0, -10.0, -6.0),
        "heart_disease" => (4.0, -5.0, -12.0),
        _ => (0.0, 0.0, 0.0),
    };
    let sex_adj = if male { 1.0 } else { 0.0 };

    let protein = (0.9 * weight_kg + 12.0 * sex_adj - 0.15 * age + protein_adj
        + gaussian(rng, 4.0))
    .max(20.0);
    let carbs = (2.6 * weight_kg + 35.0 * sex_adj - 0.9 * age + 60.0 + carb_adj
        + gaussian(rng, 12.0))
    .max(40.0);
    let fat = (0.7 * weight_kg + 8.0 * sex_adj - 0.1 * age + 10.0 + fat_adj
        + gaussian(rng, 3.0))
    .max(15.0);
    let calories = protein * 4.0 + carbs * 4.0 + fat * 9.0;

    PatientRecord::new()
        .with_number(columns::AGE, age)
        .with_text(columns::GENDER, gender)
        .with_number(columns::HEIGHT_CM, round2(height_cm))
        .with_number(columns::WEIGHT_KG, round2(weight_kg))
        .with_number(columns::BMI, round2(bmi))
        .with_text(columns::CHRONIC_DISEASE, disease)
        .with_number(columns::RECOMMENDED_PROTEIN, round2(protein))
        .with_number(columns::RECOMMENDED_CARBS, round2(carbs))
        .with_number(columns::RECOMMENDED_FATS, round2(fat))
        .with_number(columns::RECOMMENDED_CALORIES, round2(calories))
}

/// Box-Muller transform on two uniform draws.
fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    let u1: f64 = rng.random_range(f64::EPSILON..1.0);
    let u2: f64 = rng.random_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos() * std_dev
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TARGET_COLUMNS;

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate(20, 3);
        let b = generate(20, 3);
        assert_eq!(a.records(), b.records());
        assert_ne!(a.records(), generate(20, 4).records());
    }

    #[test]
    fn test_generated_rows_have_targets() {
        let ds = generate(50, 1);
        assert_eq!(ds.len(), 50);
        let y = ds.targets().unwrap();
        assert_eq!(y.ncols(), TARGET_COLUMNS.len());
        assert!(y.iter().all(|v| *v > 0.0));
        assert!(ds.has_column(columns::CHRONIC_DISEASE));
        assert!(ds.has_column(columns::GENDER));
    }
}
