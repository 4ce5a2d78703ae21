//! Error types shared across the Granary pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during event validation.
#[derive(Error, Debug)]
pub enum Error {
    /// A field failed a validation constraint.
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// The publish batch as a whole is invalid (empty or over the limit).
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_field_display() {
        let err = Error::InvalidField {
            field: "topic",
            reason: "must not be empty".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("topic"));
        assert!(msg.contains("must not be empty"));
    }

    #[test]
    fn test_invalid_batch_display() {
        let err = Error::InvalidBatch("batch exceeds 1000 events".to_string());
        let msg = err.to_string();
        assert!(msg.contains("invalid batch"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_error_debug_format() {
        let err = Error::InvalidField {
            field: "source",
            reason: "must not be empty".to_string(),
        };
        let debug = format!("{:?}", err);
        assert!(debug.contains("InvalidField"));
        assert!(debug.contains("source"));
    }
}
