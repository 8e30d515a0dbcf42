//! Client-facing error taxonomy.

use thiserror::Error;

/// Failure shape for every remote operation.
///
/// State inconsistencies (e.g. an active chat missing from the chat list)
/// are deliberately not a variant: stores self-heal and log them instead of
/// surfacing an error the caller cannot act on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Connection, HTTP, or socket-level failure. The call may never have
    /// reached the application.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call succeeded at the transport level but the backend returned
    /// a structured error.
    #[error("{0}")]
    Application(String),

    /// Client-side precondition failed; no network call was made.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl CallError {
    /// Whether this failure means the session is no longer valid.
    ///
    /// Used by the cross-cutting auth policy: clear the persisted session
    /// and tell the UI to re-authenticate, instead of handling expiry at
    /// every call site.
    pub fn is_auth_failure(&self) -> bool {
        let message = match self {
            CallError::Transport(m) => m,
            CallError::Application(m) => m,
            CallError::Validation(_) => return false,
        };
        let message = message.to_lowercase();
        message.contains("401")
            || message.contains("unauthorized")
            || message.contains("unauthenticated")
            || message.contains("not authenticated")
            || message.contains("authentication")
    }
}
