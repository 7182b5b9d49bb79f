//! Error types for the mapping engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type returned by facades.
pub type FacadeResult<T> = std::result::Result<T, FacadeError>;

/// Failure reported by a platform or broker facade.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FacadeError {
    /// The referenced object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The object already exists (duplicate create).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The backend could not be reached or timed out.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend refused the request body.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// No facade is registered for the operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl FacadeError {
    /// Get error code for client handling.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Rejected(_) => "REJECTED",
            Self::Unsupported(_) => "UNSUPPORTED",
        }
    }
}

/// Failure of the device identity resolver.
///
/// "Not found" is not an error; see [`crate::identity::IdentityLookup`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IdentityError {
    /// Another writer created the same identity first.
    #[error("Identity {id_type}/{external_id} already exists")]
    Conflict { id_type: String, external_id: String },

    /// The identity backend failed.
    #[error("Identity backend failure: {0}")]
    Transport(String),
}

impl From<FacadeError> for IdentityError {
    fn from(e: FacadeError) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Failure recorded while processing a mapping run.
///
/// A run never returns these; they accumulate in
/// [`crate::context::ProcessingContext::errors`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// Expression or model error from the core crate.
    #[error(transparent)]
    Core(#[from] dynmap_core::Error),

    /// The raw payload could not be decoded for the rule's mapping type.
    #[error("Payload error: {0}")]
    Payload(String),

    /// A value could not be written into the target document.
    #[error("Substitution error at '{path_target}': {message}")]
    Substitution { path_target: String, message: String },

    /// An external id has no internal id and may not be created.
    #[error("External id {external_id} for type {id_type} not found")]
    IdentifierUnresolved { id_type: String, external_id: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A request could not be delivered.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] FacadeError),
}

impl EngineError {
    pub fn substitution(path_target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Substitution {
            path_target: path_target.into(),
            message: message.into(),
        }
    }

    /// Get error code for client handling.
    pub fn code(&self) -> &str {
        match self {
            Self::Core(e) => e.code(),
            Self::Payload(_) => "PAYLOAD_ERROR",
            Self::Substitution { .. } => "SUBSTITUTION_ERROR",
            Self::IdentifierUnresolved { .. } => "IDENTIFIER_UNRESOLVED",
            Self::Identity(_) => "IDENTITY_ERROR",
            Self::Dispatch(_) => "DISPATCH_ERROR",
        }
    }
}
