//! Error types for tern-relay

use std::sync::Arc;

use thiserror::Error;

use crate::validate::ValidationError;

/// Result type alias using tern-relay Error
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors raised before the relay starts streaming
#[derive(Error, Debug)]
pub enum RelayError {
    /// Request rejected before any upstream call
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Agent metadata could not be loaded
    #[error("agent metadata unavailable: {0}")]
    Metadata(Arc<tern_ai::Error>),

    /// Upstream call failed while setting up the run
    #[error(transparent)]
    Upstream(#[from] tern_ai::Error),
}

impl RelayError {
    /// Upstream error underneath, if any
    pub fn upstream(&self) -> Option<&tern_ai::Error> {
        match self {
            RelayError::Metadata(e) => Some(e.as_ref()),
            RelayError::Upstream(e) => Some(e),
            RelayError::Validation(_) => None,
        }
    }
}
