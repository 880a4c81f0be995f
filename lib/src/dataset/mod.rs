//! Patient datasets: loading cleaned tables and slicing them for training.
//!
//! # Core Concepts
//!
//! - **PatientRecord**: one row of named fields, numeric or categorical.
//! - **PatientDataset**: the cleaned table handed over by the data-cleaning step.
//! - **Targets**: the three recommended macros; calories are never a target.
//!
//! # Example
//!
//! ```no_run
//! use nutripredict::dataset::PatientDataset;
//!
//! let dataset = PatientDataset::from_csv_path("data/cleaned_nutricare.csv").unwrap();
//! let y = dataset.targets().unwrap();
//! assert_eq!(y.ncols(), 3);
//! ```

use ndarray::Array2;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{NutriError, Result};

pub mod record;
pub mod split;
pub mod synthetic;

pub use record::{FieldValue, PatientRecord};
pub use split::{train_test_split, KFold, SplitIndices};

/// Column names of the cleaned dataset and of raw requests.
pub mod columns {
    pub const AGE: &str = "Age";
    pub const BMI: &str = "BMI";
    pub const GENDER: &str = "Gender";
    pub const CHRONIC_DISEASE: &str = "Chronic_Disease";
    pub const HEIGHT_CM: &str = "Height_cm";
    pub const WEIGHT_KG: &str = "Weight_kg";
    pub const RECOMMENDED_PROTEIN: &str = "Recommended_Protein";
    pub const RECOMMENDED_CARBS: &str = "Recommended_Carbs";
    pub const RECOMMENDED_FATS: &str = "Recommended_Fats";
    pub const RECOMMENDED_CALORIES: &str = "Recommended_Calories";
}

/// Learned targets, in output column order: protein, carbs, fat.
pub const TARGET_COLUMNS: [&str; 3] = [
    columns::RECOMMENDED_PROTEIN,
    columns::RECOMMENDED_CARBS,
    columns::RECOMMENDED_FATS,
];

/// Cleaned tabular dataset: ordered column names plus one record per row.
#[derive(Debug, Clone, Default)]
pub struct PatientDataset {
    columns: Vec<String>,
    records: Vec<PatientRecord>,
}

impl PatientDataset {
    pub fn new(columns: Vec<String>, records: Vec<PatientRecord>) -> Self {
        Self { columns, records }
    }

    /// Build a dataset from records alone; the column list is the union of
    /// all field names in first-seen order.
    pub fn from_records(records: Vec<PatientRecord>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for name in record.field_names() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.to_string());
                }
            }
        }
        Self { columns, records }
    }

    /// Load a cleaned dataset from a CSV file with a header row.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let dataset = Self::from_csv_reader(BufReader::new(file))?;
        tracing::info!(
            path = %path.as_ref().display(),
            rows = dataset.len(),
            columns = dataset.columns.len(),
            "loaded dataset"
        );
        Ok(dataset)
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let columns: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();

        let mut records = Vec::new();
        for result in rdr.records() {
            let row = result?;
            let fields = columns
                .iter()
                .zip(row.iter())
                .map(|(name, cell)| (name.clone(), FieldValue::parse(cell)));
            records.push(PatientRecord::from_fields(fields));
        }
        Ok(Self { columns, records })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn records(&self) -> &[PatientRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Target matrix `(n_samples, 3)` in [`TARGET_COLUMNS`] order.
    ///
    /// # Errors
    /// - [`NutriError::MissingColumn`] if a target column is absent
    /// - [`NutriError::InvalidTarget`] if any target cell is missing or non-numeric
    pub fn targets(&self) -> Result<Array2<f64>> {
        for target in TARGET_COLUMNS {
            if !self.has_column(target) {
                return Err(NutriError::MissingColumn(target.to_string()));
            }
        }
        let mut y = Array2::zeros((self.records.len(), TARGET_COLUMNS.len()));
        for (row, record) in self.records.iter().enumerate() {
            for (col, target) in TARGET_COLUMNS.iter().enumerate() {
                y[[row, col]] = record.number(target).ok_or_else(|| NutriError::InvalidTarget {
                    row,
                    column: target.to_string(),
                })?;
            }
        }
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Age,Gender,BMI,Chronic_Disease,Recommended_Protein,Recommended_Carbs,Recommended_Fats
25,Male,22.9,none,120,250,70
61,Female,31.2,diabetes,95,180,60
44,Male,,hypertension,110,210,65
";

    #[test]
    fn test_load_csv() {
        let ds = PatientDataset::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(ds.len(), 3);
        assert!(ds.has_column("Chronic_Disease"));
        assert_eq!(ds.records()[1].category("Gender").as_deref(), Some("Female"));
        assert!(ds.records()[2].get("BMI").unwrap().is_missing());
    }

    #[test]
    fn test_targets_matrix() {
        let ds = PatientDataset::from_csv_reader(CSV.as_bytes()).unwrap();
        let y = ds.targets().unwrap();
        assert_eq!(y.shape(), &[3, 3]);
        assert_eq!(y[[0, 0]], 120.0);
        assert_eq!(y[[1, 1]], 180.0);
        assert_eq!(y[[2, 2]], 65.0);
    }

    #[test]
    fn test_targets_missing_column() {
        let csv = "Age,Recommended_Protein\n30,100\n";
        let ds = PatientDataset::from_csv_reader(csv.as_bytes()).unwrap();
        assert!(matches!(ds.targets(), Err(NutriError::MissingColumn(_))));
    }

    #[test]
    fn test_targets_invalid_cell() {
        let csv = "Recommended_Protein,Recommended_Carbs,Recommended_Fats\n100,abc,50\n";
        let ds = PatientDataset::from_csv_reader(csv.as_bytes()).unwrap();
        match ds.targets() {
            Err(NutriError::InvalidTarget { row, column }) => {
                assert_eq!(row, 0);
                assert_eq!(column, "Recommended_Carbs");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_from_records_collects_columns() {
        let ds = PatientDataset::from_records(vec![
            PatientRecord::new().with_number("Age", 30.0),
            PatientRecord::new().with_text("Gender", "Male").with_number("Age", 40.0),
        ]);
        assert_eq!(ds.columns(), &["Age".to_string(), "Gender".to_string()]);
    }
}
