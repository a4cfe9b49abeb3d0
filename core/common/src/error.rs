//! Common error types for the dav sync client.

use thiserror::Error;

/// Top-level error type for sync client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure: connection refused, timeout, cancelled request.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local cache operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource with the same identity already exists remotely.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The access token is stale and must be renewed.
    #[error("Session expired")]
    SessionExpired,

    /// The session is no longer valid and renewal is impossible.
    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// The remote rejected the request for a reason not covered above.
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The operation needs a logged-in session.
    #[error("Not logged in")]
    NotLoggedIn,

    /// The background sync task is not running.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Create a remote error from status and message.
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Whether the failure is transient and the operation may succeed on a later run.
    ///
    /// Transient failures must never change cached state.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Io(_) => true,
            Self::Remote { status, .. } => matches!(*status, 408 | 425 | 429 | 500..=599),
            _ => false,
        }
    }

    /// Whether the remote reported the resource as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the remote reported a uuid collision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether this error must end the local session.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, Self::SessionInvalid(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
