//! Error types for tern-ai

use thiserror::Error;

/// Result type alias using tern-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the upstream agent service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned an error response
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// Rate limit exceeded
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication against the upstream failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// No upstream credential configured
    #[error("Invalid or missing upstream credential")]
    MissingCredential,

    /// Stream was aborted
    #[error("Request aborted")]
    Aborted,

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from type and message
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                let et = error_type.to_lowercase();
                let msg = message.to_lowercase();
                et.contains("rate_limit")
                    || et.contains("server_error")
                    || et.contains("overloaded")
                    || msg.contains("rate limit")
                    || msg.contains("too many requests")
            }
            _ => false,
        }
    }

    /// Check if this error means the upstream rejected our credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::MissingCredential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_typed_variants() {
        assert!(Error::RateLimited { retry_after: Some(5) }.is_retryable());
        assert!(Error::Sse("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_retryable_api_rate_limit() {
        assert!(Error::api("rate_limit_exceeded", "slow down").is_retryable());
        assert!(Error::api("error", "Too many requests").is_retryable());
        assert!(Error::api("server_error", "upstream hiccup").is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!Error::api("invalid_request_error", "bad conversation id").is_retryable());
        assert!(!Error::Auth("401".into()).is_retryable());
        assert!(!Error::MissingCredential.is_retryable());
        assert!(!Error::Aborted.is_retryable());
    }

    #[test]
    fn test_is_auth() {
        assert!(Error::Auth("expired".into()).is_auth());
        assert!(Error::MissingCredential.is_auth());
        assert!(!Error::api("server_error", "boom").is_auth());
    }
}
