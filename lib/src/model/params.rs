//! Hyperparameter values and assignment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{NutriError, Result};

/// A single hyperparameter value as written in a search space or config file.
///
/// Deserialized untagged, so JSON `null`, `3`, `0.1` and `"sqrt"` all work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "None"),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl ParamValue {
    fn invalid(&self, param: &str, expected: &str) -> NutriError {
        NutriError::InvalidParameter(format!("{} expects {}, got {}", param, expected, self))
    }

    pub fn as_usize(&self, param: &str) -> Result<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Ok(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Ok(*v as usize),
            _ => Err(self.invalid(param, "a non-negative integer")),
        }
    }

    pub fn as_bool(&self, param: &str) -> Result<bool> {
        match self {
            ParamValue::Bool(v) => Ok(*v),
            _ => Err(self.invalid(param, "true or false")),
        }
    }

    /// `null` means "no limit".
    pub fn as_opt_usize(&self, param: &str) -> Result<Option<usize>> {
        match self {
            ParamValue::Null => Ok(None),
            other => other.as_usize(param).map(Some),
        }
    }

    pub fn as_f64(&self, param: &str) -> Result<f64> {
        match self {
            ParamValue::Int(v) => Ok(*v as f64),
            ParamValue::Float(v) if v.is_finite() => Ok(*v),
            _ => Err(self.invalid(param, "a number")),
        }
    }

    /// A number in `(0, 1]`.
    pub fn as_fraction(&self, param: &str) -> Result<f64> {
        let v = self.as_f64(param)?;
        if v > 0.0 && v <= 1.0 {
            Ok(v)
        } else {
            Err(self.invalid(param, "a fraction in (0, 1]"))
        }
    }

    pub fn as_positive_f64(&self, param: &str) -> Result<f64> {
        let v = self.as_f64(param)?;
        if v > 0.0 {
            Ok(v)
        } else {
            Err(self.invalid(param, "a positive number"))
        }
    }

    pub fn as_non_negative_f64(&self, param: &str) -> Result<f64> {
        let v = self.as_f64(param)?;
        if v >= 0.0 {
            Ok(v)
        } else {
            Err(self.invalid(param, "a non-negative number"))
        }
    }
}

/// One assignment of values to named hyperparameters.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Models whose hyperparameters can be set by name.
pub trait Tunable {
    /// Set one hyperparameter.
    ///
    /// # Errors
    /// - [`NutriError::UnknownParameter`] if the model has no such parameter
    /// - [`NutriError::InvalidParameter`] if the value has the wrong type or range
    fn set_param(&mut self, name: &str, value: &ParamValue) -> Result<()>;

    /// Apply a whole parameter set to a copy of `self`.
    fn with_params(&self, params: &ParamSet) -> Result<Self>
    where
        Self: Clone + Sized,
    {
        let mut model = self.clone();
        for (name, value) in params {
            model.set_param(name, value)?;
        }
        Ok(model)
    }
}

pub(crate) fn unknown_param(model: &str, param: &str) -> NutriError {
    NutriError::UnknownParameter {
        model: model.to_string(),
        param: param.to_string(),
    }
}

/// Number of features considered at each split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum MaxFeatures {
    #[default]
    All,
    Sqrt,
    Log2,
    Fraction(f64),
    Count(usize),
}

impl MaxFeatures {
    /// Resolve against the number of available features; never below 1.
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => (n_features as f64).sqrt().floor() as usize,
            MaxFeatures::Log2 => (n_features as f64).log2().floor() as usize,
            MaxFeatures::Fraction(f) => (f * n_features as f64).floor() as usize,
            MaxFeatures::Count(c) => *c,
        };
        n.clamp(1, n_features.max(1))
    }

    pub fn from_param(value: &ParamValue, param: &str) -> Result<Self> {
        match value {
            ParamValue::Null => Ok(MaxFeatures::All),
            ParamValue::Bool(_) => Err(NutriError::InvalidParameter(format!(
                "{} expects sqrt, log2, all, a fraction or a count, got {}",
                param, value
            ))),
            ParamValue::Text(s) => match s.as_str() {
                "sqrt" => Ok(MaxFeatures::Sqrt),
                "log2" => Ok(MaxFeatures::Log2),
                "all" => Ok(MaxFeatures::All),
                _ => Err(NutriError::InvalidParameter(format!(
                    "{} expects sqrt, log2, all, a fraction or a count, got {}",
                    param, s
                ))),
            },
            ParamValue::Int(_) => Ok(MaxFeatures::Count(value.as_usize(param)?.max(1))),
            ParamValue::Float(_) => Ok(MaxFeatures::Fraction(value.as_fraction(param)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json() {
        let values: Vec<ParamValue> = serde_json::from_str(r#"[null, true, 3, 0.5, "sqrt"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                ParamValue::Null,
                ParamValue::Bool(true),
                ParamValue::Int(3),
                ParamValue::Float(0.5),
                ParamValue::Text("sqrt".into())
            ]
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(ParamValue::Int(5).as_usize("n").unwrap(), 5);
        assert!(ParamValue::Int(-1).as_usize("n").is_err());
        assert_eq!(ParamValue::Null.as_opt_usize("d").unwrap(), None);
        assert_eq!(ParamValue::Int(2).as_f64("x").unwrap(), 2.0);
        assert!(ParamValue::Float(1.5).as_fraction("f").is_err());
        assert!(ParamValue::Text("a".into()).as_f64("x").is_err());
    }

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::All.resolve(9), 9);
        assert_eq!(MaxFeatures::Sqrt.resolve(9), 3);
        assert_eq!(MaxFeatures::Log2.resolve(9), 3);
        assert_eq!(MaxFeatures::Fraction(0.01).resolve(9), 1);
        assert_eq!(MaxFeatures::Count(20).resolve(9), 9);
        assert_eq!(
            MaxFeatures::from_param(&"sqrt".into(), "max_features").unwrap(),
            MaxFeatures::Sqrt
        );
        assert!(MaxFeatures::from_param(&"cube".into(), "max_features").is_err());
    }
}
