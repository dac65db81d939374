//! tern-ai: wire protocol and upstream agent backend abstraction
//!
//! This crate holds the types shared by the relay and its consumers (the SSE
//! frame protocol and the chat request body) plus the interface to the hosted
//! agent service the relay proxies to.

pub mod backends;
pub mod error;
pub mod frame;
pub mod stream;
pub mod types;

pub use backends::AgentBackend;
pub use error::{Error, Result};
pub use frame::{ChatRequest, ErrorDetail, ErrorResponse, StreamFrame, UsageReport};
pub use stream::{UpstreamEvent, UpstreamEventStream};
pub use types::*;
