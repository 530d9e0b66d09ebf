use std::time::Duration;

use thiserror::Error;

/// Errors raised by the brand normalization pipeline
///
/// Only `CatalogMismatch`, `InputSchema` and the wrapped I/O errors are fatal.
/// The LLM-related variants describe per-unit failures that the stages absorb
/// and record instead of propagating.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Brand has no entry in the synonym cache yet
    #[error("brand not in synonym cache: {0}")]
    CacheMiss(String),

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A scored detection points at a brand the catalog does not know
    #[error("detection for dialogue {dialogue_id} references unknown brand {brand:?}")]
    CatalogMismatch { dialogue_id: String, brand: String },

    #[error("malformed input at {location}: {message}")]
    InputSchema { location: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_keeps_sub_second_precision() {
        let error = PipelineError::Timeout(Duration::from_millis(100));
        assert_eq!(error.to_string(), "request timed out after 100ms");

        let error = PipelineError::Timeout(Duration::from_secs(180));
        assert_eq!(error.to_string(), "request timed out after 180s");
    }

    #[test]
    fn test_structural_error_messages() {
        let mismatch = PipelineError::CatalogMismatch {
            dialogue_id: "7".into(),
            brand: "Ghost".into(),
        };
        assert!(mismatch.to_string().contains("Ghost"));

        let schema = PipelineError::InputSchema {
            location: "dialogs.csv row 3".into(),
            message: "ground truth is not a JSON list".into(),
        };
        assert!(schema.to_string().starts_with("malformed input at dialogs.csv row 3"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: PipelineError = json_error.into();
        assert!(matches!(error, PipelineError::Json(_)));
    }
}
