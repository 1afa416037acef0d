//! Error types for the Term profiling library.
//!
//! All fallible operations return [`ProfileResult`]. The variants mirror the
//! failure classes a profiling pipeline has to tell apart: construction bugs
//! (integrity), grouping mistakes made by the caller or the driving engine,
//! incompatible model metrics, wire-format problems and bad input values.

use thiserror::Error;

use crate::metrics::ModelType;

/// The main error type for the Term profiling library.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// A required profile field is missing or malformed.
    ///
    /// This indicates a construction bug and is never retried.
    #[error("Profile integrity violated: {0}")]
    Integrity(String),

    /// Two profiles (or a profile and a record) disagree on grouping identity.
    #[error("Mismatched {field}. Current [{previous}] is merged with [{current}]")]
    InconsistentGrouping {
        /// The field that differs (e.g. "tags", "data timestamp")
        field: String,
        /// Value held by the accumulator / left operand
        previous: String,
        /// Value carried by the incoming record / right operand
        current: String,
    },

    /// Model metrics of different variants cannot be combined.
    #[error("Mismatched model type: expected {expected}, got {found}")]
    ModelTypeMismatch { expected: ModelType, found: ModelType },

    /// Model metrics of the same variant but tracking different fields.
    #[error("Mismatched model {role} field: expected '{expected}', got '{found}'")]
    ModelFieldMismatch {
        role: &'static str,
        expected: String,
        found: String,
    },

    /// The serialized profile uses a schema major version this reader does not know.
    #[error("Unsupported schema version {major}.{minor} (supported major version: {supported})")]
    UnsupportedSchema {
        major: u32,
        minor: u32,
        supported: u32,
    },

    /// A declared field is absent from a record's schema.
    #[error("Field '{field}' not found in record")]
    MissingField { field: String },

    /// A field is present but its value cannot be used for the requested purpose.
    #[error("Invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Two column accumulators could not be merged.
    #[error("Failed to merge column '{column}': {message}")]
    ColumnMerge { column: String, message: String },

    /// Protobuf decoding failed.
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Framing or segment reassembly failed.
    #[error("Wire format error: {0}")]
    Wire(String),

    /// Error from I/O operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from serialization of summaries or configuration.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error from Arrow operations.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from DataFusion operations.
    #[error("DataFusion error: {0}")]
    DataFusion(#[from] datafusion::error::DataFusionError),

    /// Error related to configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A type alias for `Result<T, ProfileError>`.
pub type ProfileResult<T> = std::result::Result<T, ProfileError>;

impl ProfileError {
    /// Creates a new integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity(message.into())
    }

    /// Creates a grouping mismatch error naming both conflicting values.
    pub fn inconsistent_grouping(
        field: impl Into<String>,
        previous: impl Into<String>,
        current: impl Into<String>,
    ) -> Self {
        Self::InconsistentGrouping {
            field: field.into(),
            previous: previous.into(),
            current: current.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a wire format error.
    pub fn wire(message: impl Into<String>) -> Self {
        Self::Wire(message.into())
    }

    /// Returns true for errors caused by routing records or profiles of
    /// different groups into the same accumulator.
    pub fn is_grouping_error(&self) -> bool {
        matches!(self, Self::InconsistentGrouping { .. })
    }
}

impl From<serde_json::Error> for ProfileError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, msg: &str) -> ProfileResult<T>;

    /// Adds context with a lazy message.
    fn with_context<F>(self, f: F) -> ProfileResult<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<ProfileError>,
{
    fn context(self, msg: &str) -> ProfileResult<T> {
        self.with_context(|| msg.to_string())
    }

    fn with_context<F>(self, f: F) -> ProfileResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| match e.into() {
            ProfileError::Internal(inner) => ProfileError::Internal(format!("{}: {}", f(), inner)),
            ProfileError::Wire(inner) => ProfileError::Wire(format!("{}: {}", f(), inner)),
            other => ProfileError::Internal(format!("{}: {}", f(), other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_error_names_both_values() {
        let err = ProfileError::inconsistent_grouping("data timestamp", "2024-01-01", "2024-01-02");
        assert_eq!(
            err.to_string(),
            "Mismatched data timestamp. Current [2024-01-01] is merged with [2024-01-02]"
        );
        assert!(err.is_grouping_error());
    }

    #[test]
    fn test_model_type_mismatch() {
        let err = ProfileError::ModelTypeMismatch {
            expected: ModelType::Classification,
            found: ModelType::Regression,
        };
        assert_eq!(
            err.to_string(),
            "Mismatched model type: expected CLASSIFICATION, got REGRESSION"
        );
        assert!(!err.is_grouping_error());
    }

    #[test]
    fn test_unsupported_schema() {
        let err = ProfileError::UnsupportedSchema {
            major: 2,
            minor: 0,
            supported: 1,
        };
        assert!(err.to_string().contains("2.0"));
    }

    #[test]
    fn test_missing_field() {
        let err = ProfileError::missing_field("prediction");
        assert_eq!(err.to_string(), "Field 'prediction' not found in record");
    }

    #[test]
    fn test_error_context() {
        fn failing_operation() -> ProfileResult<()> {
            Err(ProfileError::Internal("lock poisoned".to_string()))
        }

        let err = failing_operation().context("While tracking").unwrap_err();
        assert!(err.to_string().contains("While tracking"));
        assert!(err.to_string().contains("lock poisoned"));
    }
}
