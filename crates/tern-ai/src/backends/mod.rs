//! Upstream agent backends

pub mod foundry;

use crate::{AgentMetadata, ConversationId, Error, Result, UpstreamEventStream, UserMessage};
use async_trait::async_trait;

/// Trait for hosted agent services the relay can proxy to
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Fetch the agent definition (name, model, instructions, starter prompts)
    async fn agent_metadata(&self) -> Result<AgentMetadata>;

    /// Create a new conversation, optionally titled
    async fn create_conversation(&self, title: Option<&str>) -> Result<ConversationId>;

    /// Submit a user message to a conversation and stream the agent's run.
    ///
    /// Errors returned here happen before any event was produced; failures
    /// once the stream is open arrive as [`crate::UpstreamEvent::Error`].
    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &UserMessage,
    ) -> Result<UpstreamEventStream>;
}

/// Resolve a secret that may be given inline or as `env:VAR_NAME`
pub fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var.trim()).map_err(|_| Error::MissingCredential),
        None if value.is_empty() => Err(Error::MissingCredential),
        None => Ok(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_inline_secret() {
        assert_eq!(resolve_secret("abc123").unwrap(), "abc123");
    }

    #[test]
    fn test_resolve_missing_env_secret() {
        let err = resolve_secret("env:TERN_TEST_SURELY_UNSET_VARIABLE").unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn test_resolve_empty_secret() {
        assert!(resolve_secret("").is_err());
    }
}
