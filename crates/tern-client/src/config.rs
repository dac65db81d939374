//! `[client]` settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::SessionConfig;
use crate::transport::RetryConfig;

/// Settings for talking to a relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the relay
    pub relay_url: String,
    /// Bearer token, inline or `env:VAR_NAME`
    pub token: Option<String>,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub dedupe_consecutive_chunks: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            relay_url: "http://127.0.0.1:8080".to_string(),
            token: Some("env:TERN_TOKEN".to_string()),
            max_retries: retry.max_retries,
            initial_retry_delay_ms: retry.initial_delay.as_millis() as u64,
            max_retry_delay_ms: retry.max_delay.as_millis() as u64,
            dedupe_consecutive_chunks: true,
        }
    }
}

impl ClientConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            ..Default::default()
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            retry: self.retry(),
            dedupe_consecutive_chunks: self.dedupe_consecutive_chunks,
        }
    }

    /// Resolve the configured token, following `env:VAR_NAME`
    pub fn resolve_token(&self) -> Option<String> {
        let raw = self.token.as_deref()?;
        match raw.strip_prefix("env:") {
            Some(var) => std::env::var(var.trim()).ok().filter(|t| !t.is_empty()),
            None if raw.is_empty() => None,
            None => Some(raw.to_string()),
        }
    }
}
