//! tern-relay: streaming chat relay
//!
//! Accepts chat requests from authenticated browser clients, opens a
//! streaming run against the hosted agent service and forwards the run as a
//! normalized SSE frame sequence.

pub mod api;
pub mod auth;
pub mod citations;
pub mod config;
pub mod error;
pub mod metadata;
pub mod relay;
pub mod validate;

pub use api::{ApiError, AppState, router};
pub use auth::{AuthError, AuthState, Claims, CurrentUser, DevValidator, JwtValidator, TokenValidator};
pub use config::{ServerConfig, UpstreamConfig};
pub use error::{RelayError, Result};
pub use metadata::MetadataCache;
pub use relay::{FrameTranslator, Relay};
pub use validate::{ValidatedRequest, ValidationError, validate_request};
