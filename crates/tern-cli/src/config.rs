//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tern_client::ClientConfig;
use tern_relay::{ServerConfig, UpstreamConfig};

/// Configuration for tern
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub client: ClientConfig,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tern")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for TERN_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("TERN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from `path`, or defaults if the file does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the example config unless a file already exists
    pub fn init(path: &Path) -> std::io::Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())?;
        Ok(true)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# tern configuration file
# Place at ~/.config/tern/config.toml (Linux) or set TERN_CONFIG_PATH

[server]
bind = "127.0.0.1:8080"
# Scope every bearer token must carry
required_scope = "Chat.ReadWrite"
# Accept any bearer token (local development only)
dev_auth = false
# HS256 secret used to verify tokens; env:VAR reads an environment variable
jwt_secret = "env:TERN_JWT_SECRET"
# jwt_audience = "api://tern"
# jwt_issuer = "https://login.example.com/tenant/v2.0"

[upstream]
endpoint = "https://example.services.ai.azure.com/api/projects/default"
agent = "helpdesk"
api_key = "env:TERN_UPSTREAM_KEY"
# bearer_token = "env:TERN_UPSTREAM_TOKEN"
# api_version = "2025-05-15-preview"
connect_timeout_secs = 10

[client]
relay_url = "http://127.0.0.1:8080"
token = "env:TERN_TOKEN"
max_retries = 3
initial_retry_delay_ms = 500
max_retry_delay_ms = 8000
dedupe_consecutive_chunks = true
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = Config::parse(example_config()).unwrap();
        assert_eq!(config.server.required_scope, "Chat.ReadWrite");
        assert_eq!(config.upstream.agent, "helpdesk");
        assert_eq!(config.client.max_retries, 3);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = Config::parse("[server]\ndev_auth = true\n").unwrap();
        assert!(config.server.dev_auth);
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.client.relay_url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/tern/config.toml")).unwrap();
        assert!(config.upstream.endpoint.is_empty());
    }
}
