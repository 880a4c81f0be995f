//! Deterministic transformation of raw patient records into feature rows.
//!
//! One code path, [`FittedFeatureEngineer::transform_record`], builds every
//! feature row, both for the training matrix and for record-level inference,
//! so the two can never drift apart.

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::encoding::{DropFirstOneHot, Encoded, FittedDropFirstOneHot};
use super::schema::{FeatureMatrix, FeatureSchema};
use crate::dataset::{columns, PatientDataset, PatientRecord};
use crate::error::{NutriError, Result};
use crate::model::{corrupt, CheckIntegrity};

pub const CARB_RATIO: &str = "Carb_ratio";
pub const PROTEIN_RATIO: &str = "Protein_ratio";
pub const FAT_RATIO: &str = "Fat_ratio";

/// Share of each macro in the recommended total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacroRatios {
    pub carb: f64,
    pub protein: f64,
    pub fat: f64,
}

impl MacroRatios {
    /// Ratios of each macro to `carbs + protein + fats`.
    ///
    /// A zero total yields `0, 0, 0` rather than `NaN`.
    pub fn from_grams(carbs: f64, protein: f64, fats: f64) -> Self {
        let total = carbs + protein + fats;
        if total == 0.0 {
            return Self {
                carb: 0.0,
                protein: 0.0,
                fat: 0.0,
            };
        }
        Self {
            carb: carbs / total,
            protein: protein / total,
            fat: fats / total,
        }
    }
}

/// Numeric (non-categorical) features, in schema order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum NumericFeature {
    Age,
    Bmi,
    CarbRatio,
    ProteinRatio,
    FatRatio,
}

impl NumericFeature {
    const ALL: [NumericFeature; 5] = [
        NumericFeature::Age,
        NumericFeature::Bmi,
        NumericFeature::CarbRatio,
        NumericFeature::ProteinRatio,
        NumericFeature::FatRatio,
    ];

    fn name(self) -> &'static str {
        match self {
            NumericFeature::Age => columns::AGE,
            NumericFeature::Bmi => columns::BMI,
            NumericFeature::CarbRatio => CARB_RATIO,
            NumericFeature::ProteinRatio => PROTEIN_RATIO,
            NumericFeature::FatRatio => FAT_RATIO,
        }
    }

    /// Whether the dataset carries what this feature is computed from.
    fn available_in(self, dataset: &PatientDataset) -> bool {
        let has_macros = [
            columns::RECOMMENDED_CARBS,
            columns::RECOMMENDED_PROTEIN,
            columns::RECOMMENDED_FATS,
        ]
        .iter()
        .all(|c| dataset.has_column(c));
        match self {
            NumericFeature::Age => dataset.has_column(columns::AGE),
            NumericFeature::Bmi => {
                dataset.has_column(columns::BMI)
                    || (dataset.has_column(columns::HEIGHT_CM)
                        && dataset.has_column(columns::WEIGHT_KG))
            }
            NumericFeature::CarbRatio | NumericFeature::ProteinRatio | NumericFeature::FatRatio => {
                has_macros || dataset.has_column(self.name())
            }
        }
    }
}

/// Unfitted feature engineer.
///
/// # Example
/// ```
/// use nutripredict::dataset::synthetic;
/// use nutripredict::features::FeatureEngineer;
///
/// let dataset = synthetic::generate(40, 1);
/// let (fitted, matrix) = FeatureEngineer::new().fit_transform(&dataset).unwrap();
/// assert_eq!(matrix.schema(), fitted.schema());
/// assert_eq!(&matrix.schema().names()[..2], &["Age".to_string(), "BMI".to_string()]);
/// ```
#[derive(Clone, Debug)]
pub struct FeatureEngineer {
    categorical_columns: Vec<String>,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureEngineer {
    /// Engineer with the default categorical columns `Chronic_Disease` and `Gender`.
    pub fn new() -> Self {
        Self {
            categorical_columns: vec![
                columns::CHRONIC_DISEASE.to_string(),
                columns::GENDER.to_string(),
            ],
        }
    }

    pub fn with_categorical_columns<I, S>(mut self, cols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categorical_columns = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Derive the feature schema and category lists from a training dataset.
    ///
    /// Features whose source columns are absent are left out of the schema,
    /// as are categorical columns with a single observed category (their only
    /// category is the dropped baseline).
    pub fn fit(&self, dataset: &PatientDataset) -> Result<FittedFeatureEngineer> {
        if dataset.is_empty() {
            return Err(NutriError::EmptyData(
                "cannot fit features on an empty dataset".to_string(),
            ));
        }

        let numeric: Vec<NumericFeature> = NumericFeature::ALL
            .iter()
            .copied()
            .filter(|f| f.available_in(dataset))
            .collect();

        let mut encoders = Vec::new();
        for column in &self.categorical_columns {
            if !dataset.has_column(column) {
                tracing::debug!(column = %column, "categorical column absent, skipping");
                continue;
            }
            let values = dataset.records().iter().map(|r| r.category(column));
            match DropFirstOneHot::new(column.as_str()).fit(values) {
                Ok(enc) => encoders.push(enc),
                Err(NutriError::EmptyData(_)) => {
                    tracing::warn!(column = %column, "categorical column has no values, skipping")
                }
                Err(e) => return Err(e),
            }
        }

        let names = numeric
            .iter()
            .map(|f| f.name().to_string())
            .chain(encoders.iter().flat_map(|e| e.output_names()));
        let schema = FeatureSchema::new(names)?;

        tracing::info!(
            n_features = schema.len(),
            features = ?schema.names(),
            "feature schema fitted"
        );

        Ok(FittedFeatureEngineer {
            numeric,
            encoders,
            schema,
        })
    }

    /// Fit and build the training matrix in one step.
    pub fn fit_transform(
        &self,
        dataset: &PatientDataset,
    ) -> Result<(FittedFeatureEngineer, FeatureMatrix)> {
        let fitted = self.fit(dataset)?;
        let matrix = fitted.transform(dataset)?;
        Ok((fitted, matrix))
    }
}

impl CheckIntegrity for FittedFeatureEngineer {
    fn check_integrity(&self) -> Result<()> {
        for encoder in &self.encoders {
            let categories = encoder.categories();
            if categories.is_empty() || !categories.windows(2).all(|w| w[0] < w[1]) {
                return Err(corrupt(format!(
                    "category list of {} is empty or unsorted",
                    encoder.column()
                )));
            }
        }
        let names: Vec<String> = self
            .numeric
            .iter()
            .map(|f| f.name().to_string())
            .chain(self.encoders.iter().flat_map(|e| e.output_names()))
            .collect();
        if names.as_slice() != self.schema.names() {
            return Err(corrupt("feature engineer output differs from its schema"));
        }
        Ok(())
    }
}

/// A single engineered row plus what had to be defaulted while building it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFeatures {
    pub values: Vec<f64>,
    /// Numeric features absent from the record, filled with `0`.
    pub defaulted: Vec<&'static str>,
    /// `(column, value)` pairs whose category was not seen during fitting.
    pub unseen: Vec<(String, String)>,
}

/// Fitted feature engineer: schema plus training-time category lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedFeatureEngineer {
    numeric: Vec<NumericFeature>,
    encoders: Vec<FittedDropFirstOneHot>,
    schema: FeatureSchema,
}

impl FittedFeatureEngineer {
    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn encoders(&self) -> &[FittedDropFirstOneHot] {
        &self.encoders
    }

    /// Build the feature row for one record.
    ///
    /// - Ratios come from the recommended macros when any is present, otherwise
    ///   from precomputed `*_ratio` fields.
    /// - Categorical columns are encoded from the raw value when present,
    ///   otherwise read from already-encoded indicator fields.
    /// - Anything else that is missing becomes `0`.
    pub fn transform_record(&self, record: &PatientRecord) -> RecordFeatures {
        let mut values = Vec::with_capacity(self.schema.len());
        let mut defaulted = Vec::new();
        let mut unseen = Vec::new();

        let from_macros = [
            columns::RECOMMENDED_CARBS,
            columns::RECOMMENDED_PROTEIN,
            columns::RECOMMENDED_FATS,
        ]
        .iter()
        .any(|c| record.number(c).is_some());
        let ratios = MacroRatios::from_grams(
            record.number(columns::RECOMMENDED_CARBS).unwrap_or(0.0),
            record.number(columns::RECOMMENDED_PROTEIN).unwrap_or(0.0),
            record.number(columns::RECOMMENDED_FATS).unwrap_or(0.0),
        );

        for feature in &self.numeric {
            let value = match feature {
                NumericFeature::Age => record.number(columns::AGE),
                NumericFeature::Bmi => record.bmi(),
                NumericFeature::CarbRatio if from_macros => Some(ratios.carb),
                NumericFeature::ProteinRatio if from_macros => Some(ratios.protein),
                NumericFeature::FatRatio if from_macros => Some(ratios.fat),
                other => record.number(other.name()),
            };
            values.push(value.unwrap_or_else(|| {
                defaulted.push(feature.name());
                0.0
            }));
        }

        for encoder in &self.encoders {
            let start = values.len();
            values.resize(start + encoder.n_features_out(), 0.0);
            let out = &mut values[start..];
            match record.category(encoder.column()) {
                Some(category) => {
                    if encoder.encode_into(Some(&category), out) == Encoded::Unseen {
                        unseen.push((encoder.column().to_string(), category));
                    }
                }
                None => {
                    for (slot, name) in out.iter_mut().zip(encoder.output_names()) {
                        *slot = record.number(&name).unwrap_or(0.0);
                    }
                }
            }
        }

        RecordFeatures {
            values,
            defaulted,
            unseen,
        }
    }

    /// Build the feature matrix for a whole dataset.
    pub fn transform(&self, dataset: &PatientDataset) -> Result<FeatureMatrix> {
        let n_features = self.schema.len();
        let mut x = Array2::zeros((dataset.len(), n_features));
        let mut defaulted: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut unseen: BTreeMap<(String, String), usize> = BTreeMap::new();

        for (row, record) in dataset.records().iter().enumerate() {
            let features = self.transform_record(record);
            for (col, value) in features.values.into_iter().enumerate() {
                x[[row, col]] = value;
            }
            for name in features.defaulted {
                *defaulted.entry(name).or_default() += 1;
            }
            for key in features.unseen {
                *unseen.entry(key).or_default() += 1;
            }
        }

        for (name, count) in &defaulted {
            tracing::warn!(feature = name, rows = count, "missing values filled with 0");
        }
        for ((column, category), count) in &unseen {
            tracing::warn!(column = %column, category = %category, rows = count, "unseen category encoded as baseline");
        }

        FeatureMatrix::new(self.schema.clone(), x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::FieldValue;

    fn dataset() -> PatientDataset {
        let csv = "\
Age,Gender,BMI,Chronic_Disease,Recommended_Protein,Recommended_Carbs,Recommended_Fats
25,Male,22.9,none,120,250,70
61,Female,31.2,diabetes,95,180,60
44,Male,27.0,hypertension,110,210,65
38,Female,24.1,none,0,0,0
";
        PatientDataset::from_csv_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_schema_layout() {
        let fitted = FeatureEngineer::new().fit(&dataset()).unwrap();
        assert_eq!(
            fitted.schema().names(),
            &[
                "Age",
                "BMI",
                "Carb_ratio",
                "Protein_ratio",
                "Fat_ratio",
                "Chronic_Disease_hypertension",
                "Chronic_Disease_none",
                "Gender_Male",
            ]
        );
    }

    #[test]
    fn test_integrity_of_decoded_engineer() {
        let fitted = FeatureEngineer::new().fit(&dataset()).unwrap();
        fitted.check_integrity().unwrap();

        let mut narrowed = fitted.clone();
        narrowed.schema = FeatureSchema::new(["Age", "BMI"]).unwrap();
        assert!(matches!(narrowed.check_integrity(), Err(NutriError::ModelLoad(_))));

        let mut no_encoders = fitted;
        no_encoders.encoders.clear();
        assert!(no_encoders.check_integrity().is_err());
    }

    #[test]
    fn test_ratio_zero_denominator() {
        let r = MacroRatios::from_grams(0.0, 0.0, 0.0);
        assert_eq!((r.carb, r.protein, r.fat), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_transform_rows() {
        let ds = dataset();
        let (fitted, m) = FeatureEngineer::new().fit_transform(&ds).unwrap();
        let x = m.values();
        assert_eq!(x.shape(), &[4, fitted.schema().len()]);

        // Row 0: male, none
        assert_eq!(x[[0, 0]], 25.0);
        assert!((x[[0, 2]] - 250.0 / 440.0).abs() < 1e-12);
        assert_eq!(x[[0, 6]], 1.0);
        assert_eq!(x[[0, 7]], 1.0);
        // Row 1: female, diabetes -> both baselines
        assert_eq!(x[[1, 5]], 0.0);
        assert_eq!(x[[1, 6]], 0.0);
        assert_eq!(x[[1, 7]], 0.0);
        // Row 3: zero macros
        assert_eq!(x[[3, 2]], 0.0);
        assert_eq!(x[[3, 3]], 0.0);
        assert_eq!(x[[3, 4]], 0.0);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let ds = dataset();
        let (f1, m1) = FeatureEngineer::new().fit_transform(&ds).unwrap();
        let (f2, m2) = FeatureEngineer::new().fit_transform(&ds.clone()).unwrap();
        assert_eq!(f1, f2);
        assert_eq!(m1, m2);
        let bits1: Vec<u64> = m1.values().iter().map(|v| v.to_bits()).collect();
        let bits2: Vec<u64> = m2.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits1, bits2);
    }

    #[test]
    fn test_unseen_category_maps_to_baseline() {
        let fitted = FeatureEngineer::new().fit(&dataset()).unwrap();
        let record = PatientRecord::new()
            .with_number("Age", 50.0)
            .with_number("BMI", 25.0)
            .with_text("Chronic_Disease", "asthma")
            .with_text("Gender", "Other");
        let features = fitted.transform_record(&record);
        assert_eq!(features.values.len(), fitted.schema().len());
        assert_eq!(&features.values[5..], &[0.0, 0.0, 0.0]);
        assert_eq!(features.unseen.len(), 2);
    }

    #[test]
    fn test_precomputed_ratios_and_indicators() {
        let fitted = FeatureEngineer::new().fit(&dataset()).unwrap();
        let record = PatientRecord::from_fields([
            ("Age", FieldValue::Number(25.0)),
            ("BMI", FieldValue::Number(22.9)),
            ("Carb_ratio", FieldValue::Number(0.4)),
            ("Protein_ratio", FieldValue::Number(0.3)),
            ("Fat_ratio", FieldValue::Number(0.3)),
            ("Gender_Male", FieldValue::Number(1.0)),
        ]);
        let features = fitted.transform_record(&record);
        assert_eq!(
            features.values,
            vec![25.0, 22.9, 0.4, 0.3, 0.3, 0.0, 0.0, 1.0]
        );
        assert!(features.defaulted.is_empty());
    }

    #[test]
    fn test_bmi_derived_and_missing_age_defaulted() {
        let fitted = FeatureEngineer::new().fit(&dataset()).unwrap();
        let record = PatientRecord::new()
            .with_number("Height_cm", 200.0)
            .with_number("Weight_kg", 100.0);
        let features = fitted.transform_record(&record);
        assert_eq!(features.values[0], 0.0);
        assert!((features.values[1] - 25.0).abs() < 1e-12);
        assert!(features.defaulted.contains(&"Age"));
    }

    #[test]
    fn test_absent_columns_are_left_out() {
        let csv = "Age,Recommended_Protein,Recommended_Carbs,Recommended_Fats\n30,1,2,3\n";
        let ds = PatientDataset::from_csv_reader(csv.as_bytes()).unwrap();
        let fitted = FeatureEngineer::new().fit(&ds).unwrap();
        assert_eq!(
            fitted.schema().names(),
            &["Age", "Carb_ratio", "Protein_ratio", "Fat_ratio"]
        );
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let ds = PatientDataset::default();
        assert!(matches!(
            FeatureEngineer::new().fit(&ds),
            Err(NutriError::EmptyData(_))
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn ratios_sum_to_one(c in 0.0f64..1000.0, p in 0.0f64..1000.0, f in 0.0f64..1000.0) {
                prop_assume!(c + p + f > 0.0);
                let r = MacroRatios::from_grams(c, p, f);
                prop_assert!((r.carb + r.protein + r.fat - 1.0).abs() < 1e-9);
            }

            #[test]
            fn record_ratios_match_macros(c in 0.0f64..500.0, p in 0.0f64..500.0, f in 0.0f64..500.0) {
                let fitted = FeatureEngineer::new().fit(&dataset()).unwrap();
                let record = PatientRecord::new()
                    .with_number("Recommended_Carbs", c)
                    .with_number("Recommended_Protein", p)
                    .with_number("Recommended_Fats", f);
                let values = fitted.transform_record(&record).values;
                let expected = MacroRatios::from_grams(c, p, f);
                prop_assert_eq!(values[2], expected.carb);
                prop_assert_eq!(values[3], expected.protein);
                prop_assert_eq!(values[4], expected.fat);
            }
        }
    }
}
