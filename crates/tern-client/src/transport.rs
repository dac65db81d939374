//! Transport to the relay

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::StatusCode;
use tern_ai::{AgentMetadata, ChatRequest, ErrorResponse};
use tokio_stream::Stream;

use crate::error::{Error, Result};

/// Raw response body of a chat request
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Retry configuration for opening a stream
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Source of the bearer token sent to the relay
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, or `None` when the user must sign in
    async fn token(&self) -> Option<String>;
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Opens chat streams against a relay
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// POST the request and return the SSE body once the relay accepted it.
    ///
    /// Errors returned here happened before streaming began.
    async fn open(&self, request: &ChatRequest, token: &str) -> Result<ByteStream>;
}

/// HTTP transport using reqwest
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// `GET /api/agent`
    pub async fn agent_metadata(&self, token: &str) -> Result<AgentMetadata> {
        let response = self
            .client
            .get(format!("{}/api/agent", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("invalid agent metadata: {}", e)))
    }
}

#[async_trait]
impl RelayTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest, token: &str) -> Result<ByteStream> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;
        let response = check_status(response).await?;

        tracing::debug!(status = %response.status(), "relay accepted chat request");
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::from));
        Ok(Box::pin(body))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Map a non-success relay response to an error
pub fn status_error(status: StatusCode, body: &str) -> Error {
    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.error.clone())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match status {
        StatusCode::BAD_REQUEST => Error::InvalidArgument {
            message,
            details: parsed.map(|e| e.details).unwrap_or_default(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthFailure(message),
        s if s.is_server_error() => Error::Upstream(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Error::Transport(message),
        _ => Error::Upstream(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(8));
    }

    #[test]
    fn test_status_error_invalid_argument_keeps_details() {
        let body = r#"{"error":"1 image(s) rejected","errorCode":"INVALID_ARGUMENT","details":[{"index":2,"reason":"unsupported image type 'image/bmp'"}]}"#;
        let Error::InvalidArgument { message, details } = status_error(StatusCode::BAD_REQUEST, body)
        else {
            panic!("expected invalid argument");
        };
        assert_eq!(message, "1 image(s) rejected");
        assert_eq!(details[0].index, Some(2));
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error":"token expired","errorCode":"TOKEN_EXPIRED"}"#;
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, body),
            Error::AuthFailure("token expired".into())
        );
        assert!(status_error(StatusCode::FORBIDDEN, "").is_auth_failure());
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, "<html>"),
            Error::Upstream(m) if m == "HTTP 502"
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
    }

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("abc").token().await.as_deref(), Some("abc"));
        assert!(StaticToken::none().token().await.is_none());
    }
}
