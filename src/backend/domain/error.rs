//! Error types for backend descriptor validation.

use thiserror::Error;

/// Errors returned while constructing backend domain values.
///
/// These are configuration errors: they surface when a backend is
/// registered, never while a request is being served.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendDomainError {
    /// The backend name is empty after trimming.
    #[error("backend name must not be empty")]
    EmptyBackendName,

    /// The backend name contains characters outside `[a-z0-9_-]`.
    #[error(
        "backend name '{0}' contains invalid characters (only lowercase alphanumeric, '_' and '-' allowed)"
    )]
    InvalidBackendName(String),

    /// The backend name exceeds the 64-character limit.
    #[error("backend name exceeds 64 character limit: {0}")]
    BackendNameTooLong(String),

    /// The default model identifier is empty after trimming.
    #[error("default model for backend '{0}' must not be empty")]
    EmptyDefaultModel(String),

    /// The backend declares no text-generation or streaming capability.
    #[error("backend '{0}' declares neither text generation nor streaming")]
    NoGenerationCapability(String),

    /// A per-backend timeout of zero was declared.
    #[error("backend '{0}' declares a zero timeout")]
    ZeroTimeout(String),

    /// An API-key auth requirement names no environment variable.
    #[error("backend '{0}' requires an API key but names no variable")]
    EmptyCredentialVariable(String),

    /// A backend with the same name is already registered.
    #[error("backend '{0}' is already registered")]
    DuplicateBackend(String),
}
