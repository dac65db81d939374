//! Error types for tern-client

use tern_ai::ErrorDetail;
use thiserror::Error;

/// Result type alias using tern-client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failures a send can end in
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The relay rejected the request; retrying the same input cannot help
    #[error("invalid request: {message}")]
    InvalidArgument {
        message: String,
        details: Vec<ErrorDetail>,
    },

    /// Token missing, expired or lacking the required scope
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// The relay or the agent service failed, before or during the stream
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Network failure talking to the relay
    #[error("transport error: {0}")]
    Transport(String),

    /// Cancelled by the user
    #[error("cancelled")]
    Cancelled,
}

/// What the UI should offer after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Show a retry affordance
    Retry,
    /// Send the user through sign-in again
    Reauthenticate,
    /// Nothing to offer; the input has to change (or nothing failed)
    None,
}

impl Error {
    /// Check if retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Transport(_))
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Error::AuthFailure(_))
    }

    pub fn action(&self) -> FailureAction {
        match self {
            Error::Upstream(_) | Error::Transport(_) => FailureAction::Retry,
            Error::AuthFailure(_) => FailureAction::Reauthenticate,
            Error::InvalidArgument { .. } | Error::Cancelled => FailureAction::None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_actions() {
        assert_eq!(Error::Transport("reset".into()).action(), FailureAction::Retry);
        assert_eq!(Error::Upstream("502".into()).action(), FailureAction::Retry);
        assert_eq!(
            Error::AuthFailure("expired".into()).action(),
            FailureAction::Reauthenticate
        );
        assert_eq!(
            Error::InvalidArgument {
                message: "bad image".into(),
                details: Vec::new(),
            }
            .action(),
            FailureAction::None
        );
        assert_eq!(Error::Cancelled.action(), FailureAction::None);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Transport("timeout".into()).is_retryable());
        assert!(!Error::AuthFailure("expired".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(Error::AuthFailure("x".into()).is_auth_failure());
    }
}
