//! Error taxonomy for core operations.

use thiserror::Error;

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The error taxonomy. Core operations return these upward without
/// recovery; the HTTP layer maps them to status codes, the tool layer maps
/// them to structured tool-result error objects.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A referenced entity is missing (story, fragment, branch, analysis,
    /// provider).
    #[error("not found: {0}")]
    NotFound(String),

    /// Empty required field, unknown enum value, malformed id.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation contradicts current state (deleting a non-archived
    /// fragment, switching to a variation not in the section, duplicate id).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A tool write would modify a locked fragment or remove a frozen
    /// section.
    #[error("protected: {0}")]
    Protected(String),

    /// The model/provider is unreachable or errored mid-stream.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unexpected state: missing content root, JSON parse failure, I/O.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code, used in tool-result error objects.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NotFound",
            CoreError::InvalidArgument(_) => "InvalidArgument",
            CoreError::Conflict(_) => "Conflict",
            CoreError::Protected(_) => "Protected",
            CoreError::Unavailable(_) => "Unavailable",
            CoreError::Internal(_) => "Internal",
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        CoreError::NotFound(what.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(format!("i/o: {err}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("json: {err}"))
    }
}
