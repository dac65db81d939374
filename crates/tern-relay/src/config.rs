//! Relay server and upstream settings
//!
//! These are the `[server]` and `[upstream]` tables of the tern config file.
//! Loading the file itself is the binary's job.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_ai::backends::foundry::{Credential, FoundryBackend};
use tern_ai::backends::resolve_secret;
use tern_ai::{AgentBackend, Error};

use crate::auth::{AuthState, DevValidator, JwtValidator};
use crate::relay::DEFAULT_CHANNEL_CAPACITY;

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: String,
    /// Scope every API token must carry
    pub required_scope: String,
    /// Accept any bearer token instead of validating JWTs
    pub dev_auth: bool,
    /// HS256 secret, inline or `env:VAR_NAME`
    pub jwt_secret: Option<String>,
    pub jwt_audience: Option<String>,
    pub jwt_issuer: Option<String>,
    /// Frames buffered per request before the producer waits on the client
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            required_scope: "Chat.ReadWrite".to_string(),
            dev_auth: false,
            jwt_secret: None,
            jwt_audience: None,
            jwt_issuer: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Build the authentication state described by this config
    pub fn auth_state(&self) -> Result<AuthState, Error> {
        if self.dev_auth {
            tracing::warn!("dev auth enabled: bearer tokens are not verified");
            return Ok(AuthState::new(
                Arc::new(DevValidator::new(self.required_scope.clone())),
                self.required_scope.clone(),
            ));
        }

        let secret = self
            .jwt_secret
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("server.jwt_secret is required unless dev_auth is set".into()))
            .and_then(resolve_secret)?;
        let validator = JwtValidator::new(
            &secret,
            self.jwt_audience.as_deref(),
            self.jwt_issuer.as_deref(),
        );
        Ok(AuthState::new(Arc::new(validator), self.required_scope.clone()))
    }
}

/// Hosted agent service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Project endpoint, e.g. `https://example.services.ai.azure.com/api/projects/p1`
    pub endpoint: String,
    /// Agent name or id
    pub agent: String,
    /// API key, inline or `env:VAR_NAME`
    pub api_key: Option<String>,
    /// Bearer token, inline or `env:VAR_NAME`; used when no API key is set
    pub bearer_token: Option<String>,
    pub api_version: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl UpstreamConfig {
    pub fn credential(&self) -> Result<Credential, Error> {
        match (&self.api_key, &self.bearer_token) {
            (Some(key), _) => Ok(Credential::ApiKey(resolve_secret(key)?)),
            (None, Some(token)) => Ok(Credential::Bearer(resolve_secret(token)?)),
            (None, None) => Err(Error::MissingCredential),
        }
    }

    /// Build the upstream client described by this config
    pub fn build_backend(&self) -> Result<Arc<dyn AgentBackend>, Error> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::InvalidConfig("upstream.endpoint is required".into()));
        }
        if self.agent.trim().is_empty() {
            return Err(Error::InvalidConfig("upstream.agent is required".into()));
        }

        let mut backend = FoundryBackend::new(&self.endpoint, &self.agent, self.credential()?);
        if let Some(ref version) = self.api_version {
            backend = backend.with_api_version(version);
        }
        if let Some(secs) = self.connect_timeout_secs {
            backend = backend.with_connect_timeout(Duration::from_secs(secs))?;
        }
        Ok(Arc::new(backend))
    }
}
