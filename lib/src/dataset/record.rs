//! Raw patient records as read from a cleaned table or a request body.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::columns;

/// A single cell of a patient record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A finite numeric value.
    Number(f64),
    /// A categorical (or otherwise non-numeric) value.
    Text(String),
    /// Empty cell, `NA`, `NaN` or JSON `null`.
    Missing,
}

impl FieldValue {
    /// Parse a raw CSV cell.
    ///
    /// Empty cells and the usual missing-value markers become [`FieldValue::Missing`];
    /// anything that parses as a finite number becomes [`FieldValue::Number`].
    pub fn parse(cell: &str) -> Self {
        let cell = cell.trim();
        if is_missing_marker(cell) {
            return FieldValue::Missing;
        }
        match cell.parse::<f64>() {
            Ok(v) if v.is_finite() => FieldValue::Number(v),
            _ => FieldValue::Text(cell.to_string()),
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            FieldValue::Missing => None,
        }
    }

    /// Categorical view of the value. Missing values have no category.
    pub fn as_category(&self) -> Option<String> {
        match self {
            FieldValue::Number(v) => Some(format_number_category(*v)),
            FieldValue::Text(s) => Some(s.trim().to_string()),
            FieldValue::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        if v.is_finite() {
            FieldValue::Number(v)
        } else {
            FieldValue::Missing
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<&serde_json::Value> for FieldValue {
    fn from(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Missing,
            serde_json::Value::Bool(b) => FieldValue::Number(if *b { 1.0 } else { 0.0 }),
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::from).unwrap_or(FieldValue::Missing),
            serde_json::Value::String(s) => FieldValue::parse(s),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

fn is_missing_marker(cell: &str) -> bool {
    matches!(
        cell,
        "" | "NA" | "N/A" | "NaN" | "nan" | "NAN" | "null" | "NULL" | "<NA>"
    )
}

/// Integral numbers used as categories print without a fractional part,
/// so `1` and `1.0` land in the same category.
fn format_number_category(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Mapping of named fields describing one patient.
///
/// Records are immutable once read: the builder methods consume and return
/// the record, and there is no in-place setter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Build a record from a JSON object (a request body).
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), FieldValue::from(v)))
                .collect(),
        }
    }

    pub fn with_number(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_string(), FieldValue::from(value));
        self
    }

    pub fn with_text(mut self, name: &str, value: &str) -> Self {
        self.fields
            .insert(name.to_string(), FieldValue::Text(value.to_string()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_f64)
    }

    pub fn category(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(FieldValue::as_category)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Body-mass index, taken from `BMI` or derived from `Weight_kg` and `Height_cm`.
    pub fn bmi(&self) -> Option<f64> {
        self.number(columns::BMI).or_else(|| {
            let weight = self.number(columns::WEIGHT_KG)?;
            let height_m = self.number(columns::HEIGHT_CM)? / 100.0;
            if height_m > 0.0 {
                Some(weight / (height_m * height_m))
            } else {
                None
            }
        })
    }
}
