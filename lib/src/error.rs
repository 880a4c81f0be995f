//! Error types shared by every stage of the pipeline.
//!
//! Feature-engineering and alignment problems are mostly recovered locally
//! (zero-fill, coercion to zero); the variants here are the conditions that
//! cannot be recovered and must reach the caller.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NutriError>;

/// Error type for dataset loading, training, persistence and inference.
#[derive(Error, Debug)]
pub enum NutriError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV input or output.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed JSON request, response or configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary (de)serialization of an artifact failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Empty data provided where non-empty was required.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// A column required for training is absent from the dataset.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A target cell is missing or non-numeric.
    #[error("Invalid target value in row {row}, column {column}")]
    InvalidTarget { row: usize, column: String },

    /// Shape mismatch between expected and actual matrix dimensions.
    #[error("Invalid shape: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Feature dimension mismatch between a model and its input.
    #[error("Feature mismatch: expected {expected} features, got {got}")]
    FeatureMismatch { expected: usize, got: usize },

    /// A feature name occurs twice in a schema.
    #[error("Duplicate feature name in schema: {0}")]
    DuplicateFeature(String),

    /// No feature schema could be determined; nothing can be predicted.
    #[error("Feature schema missing: {0}")]
    SchemaMissing(String),

    /// The model artifact is absent, corrupt or of an unsupported format.
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Invalid hyperparameter value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Hyperparameter name not understood by a model.
    #[error("Unknown parameter '{param}' for model {model}")]
    UnknownParameter { model: String, param: String },

    /// The candidate set to evaluate is empty.
    #[error("No candidates to evaluate")]
    NoCandidates,

    /// Normal equations could not be solved.
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    /// Invalid training configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for NutriError {
    fn from(err: bincode::Error) -> Self {
        NutriError::Serialization(err.to_string())
    }
}

impl NutriError {
    /// Whether the error must abort service startup.
    pub fn is_fatal_for_serving(&self) -> bool {
        matches!(
            self,
            NutriError::ModelLoad(_) | NutriError::SchemaMissing(_) | NutriError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_feature_mismatch() {
        let err = NutriError::FeatureMismatch {
            expected: 5,
            got: 3,
        };
        assert!(err.to_string().contains("Feature mismatch"));
        assert!(err.to_string().contains('5'));
    }

    #[test]
    fn test_error_display_invalid_target() {
        let err = NutriError::InvalidTarget {
            row: 7,
            column: "Recommended_Fats".to_string(),
        };
        assert!(err.to_string().contains("row 7"));
        assert!(err.to_string().contains("Recommended_Fats"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: NutriError = io_err.into();
        assert!(matches!(err, NutriError::Io(_)));
        assert!(err.is_fatal_for_serving());
    }

    #[test]
    fn test_error_from_bincode_error() {
        let bad_bytes: &[u8] = &[0xff, 0xff, 0xff, 0xff];
        let bincode_result: std::result::Result<String, bincode::Error> =
            bincode::deserialize(bad_bytes);
        if let Err(e) = bincode_result {
            let err: NutriError = e.into();
            assert!(matches!(err, NutriError::Serialization(_)));
        }
    }

    #[test]
    fn test_schema_missing_is_fatal() {
        assert!(NutriError::SchemaMissing("empty".into()).is_fatal_for_serving());
        assert!(!NutriError::NoCandidates.is_fatal_for_serving());
    }
}
