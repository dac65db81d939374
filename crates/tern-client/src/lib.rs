//! tern-client: consumer side of the tern relay
//!
//! Sends chat requests to the relay, decodes the SSE frame stream and folds
//! it into an [`AssistantMessageState`] that UIs observe through a watch
//! channel.

pub mod config;
pub mod decoder;
pub mod error;
pub mod message;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use decoder::FrameDecoder;
pub use error::{Error, FailureAction, Result};
pub use message::{AssistantMessageState, MessageStatus};
pub use session::{ChatSession, SendHandle, SessionConfig};
pub use transport::{ByteStream, HttpTransport, RelayTransport, RetryConfig, StaticToken, TokenProvider};
