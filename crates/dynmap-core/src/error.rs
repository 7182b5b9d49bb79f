//! Error types for the mapping core.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the expression evaluator and the mapping model.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// A path expression could not be parsed or its evaluation failed.
    #[error("Expression error in '{path}': {message}")]
    Expression { path: String, message: String },

    /// A mapping rule or sample document is not well formed.
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// A snoop operation is not allowed in the current state.
    #[error("Invalid snoop transition: {0}")]
    SnoopTransition(String),

    /// A JSON document could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build an expression error for `path`.
    pub fn expression(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Get error code for client handling.
    pub fn code(&self) -> &str {
        match self {
            Self::Expression { .. } => "EXPRESSION_ERROR",
            Self::InvalidMapping(_) => "INVALID_MAPPING",
            Self::SnoopTransition(_) => "SNOOP_TRANSITION",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
