//! Error types for hrdesk.
//!
//! This module defines a unified error enum covering every failure category
//! of the question-answering pipeline: configuration, I/O, generation,
//! retrieval, reranking, prompt rendering and orchestration.

use thiserror::Error;

/// Unified error type for hrdesk.
///
/// All fallible functions in the workspace return `Result<T, AppError>`.
/// Expected degradations (unparseable router output, failed judge calls) are
/// not errors; they are represented as values by the components that absorb
/// them.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors (fatal at startup or first use)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generation backend errors
    #[error("LLM error: {0}")]
    Llm(String),

    /// Candidate store and embedding errors
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Scoring backend errors
    #[error("Rerank error: {0}")]
    Rerank(String),

    /// Prompt loading and rendering errors
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// Orchestration errors
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// An external call exceeded its deadline
    #[error("Timed out after {seconds}s waiting for {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether this error stems from configuration rather than runtime data.
    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::Prompt(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let err = AppError::Timeout {
            operation: "candidate fetch".to_string(),
            seconds: 30,
        };
        assert_eq!(
            err.to_string(),
            "Timed out after 30s waiting for candidate fetch"
        );
    }

    #[test]
    fn test_is_config() {
        assert!(AppError::Config("bad".to_string()).is_config());
        assert!(AppError::Prompt("missing variable".to_string()).is_config());
        assert!(!AppError::Llm("unreachable".to_string()).is_config());
    }

    #[test]
    fn test_from_serde_json() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
