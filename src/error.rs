//! Error types for selfloom

use thiserror::Error;

use crate::llm::LlmError;

/// Main error type for selfloom operations
#[derive(Error, Debug)]
pub enum LoomError {
    /// Generation parameters failed validation
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Illegal run state transition
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Document not present in the store
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Target document name is already taken
    #[error("Document already exists: {0}")]
    DocumentExists(String),

    /// Document name is empty or escapes the store directory
    #[error("Invalid document name: {0:?}")]
    InvalidDocumentName(String),

    /// Prompt template could not be compiled or rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// Model transport error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for selfloom operations
pub type Result<T> = std::result::Result<T, LoomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_params_error() {
        let err = LoomError::InvalidParams("candidate_count must be at least 1".to_string());
        assert_eq!(err.to_string(), "Invalid parameters: candidate_count must be at least 1");
    }

    #[test]
    fn test_document_errors() {
        assert_eq!(
            LoomError::DocumentNotFound("draft".to_string()).to_string(),
            "Document not found: draft"
        );
        assert_eq!(
            LoomError::DocumentExists("draft".to_string()).to_string(),
            "Document already exists: draft"
        );
        assert_eq!(
            LoomError::InvalidDocumentName("../x".to_string()).to_string(),
            "Invalid document name: \"../x\""
        );
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: LoomError = LlmError::Cancelled.into();
        assert!(matches!(err, LoomError::Llm(LlmError::Cancelled)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LoomError = io_err.into();
        assert!(matches!(err, LoomError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: LoomError = json_err.into();
        assert!(matches!(err, LoomError::Json(_)));
    }
}
