//! API error responses
//!
//! Failures that happen before the first SSE byte become a JSON
//! [`ErrorResponse`] with a status code. Authentication failures are
//! rendered by [`crate::auth::AuthError`].

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tern_ai::{ErrorDetail, ErrorResponse};
use thiserror::Error;
use tracing::{error, warn};

use crate::error::RelayError;

/// API error type with structured responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    InvalidArgument {
        message: String,
        details: Vec<ErrorDetail>,
    },

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn from_upstream(err: &tern_ai::Error) -> Self {
        match err {
            tern_ai::Error::RateLimited { .. } | tern_ai::Error::Http(_) => {
                Self::ServiceUnavailable(err.to_string())
            }
            tern_ai::Error::InvalidConfig(_) | tern_ai::Error::MissingCredential => {
                Self::Internal(err.to_string())
            }
            _ => Self::Upstream(err.to_string()),
        }
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(e) => Self::InvalidArgument {
                message: e.to_string(),
                details: e.details(),
            },
            RelayError::Metadata(e) => Self::from_upstream(&e),
            RelayError::Upstream(e) => Self::from_upstream(&e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), "request failed: {}", self);
        } else {
            warn!(status = status.as_u16(), "request rejected: {}", self);
        }

        let error_code = self.error_code().to_string();
        let (error, details) = match self {
            Self::InvalidArgument { message, details } => (message, details),
            other => (other.to_string(), Vec::new()),
        };
        let body = Json(ErrorResponse {
            error,
            error_code,
            details,
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ValidationError;

    #[test]
    fn test_relay_error_mapping() {
        let err = ApiError::from(RelayError::from(ValidationError::EmptyMessage));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");

        let err = ApiError::from(RelayError::from(tern_ai::Error::RateLimited {
            retry_after: Some(3),
        }));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::from(RelayError::from(tern_ai::Error::api("server_error", "boom")));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "UPSTREAM_ERROR");

        let err = ApiError::from(RelayError::from(tern_ai::Error::MissingCredential));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
