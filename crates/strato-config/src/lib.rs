#![warn(missing_docs)]

//! # strato-config
//!
//! Configuration loading for the Strato Code Mode gateway.
//!
//! Supports TOML configuration files with environment variable expansion.
//! The resulting [`GatewayConfig`] is passed explicitly to every component
//! that needs upstream URLs, secrets, or store handles — nothing in the
//! tree reads ambient process environment at use sites.
//!
//! ## Example
//!
//! ```toml
//! [upstream]
//! api_base_url = "https://api.cloud.example/client/v4"
//! oauth_authorize_url = "https://dash.cloud.example/oauth2/auth"
//! oauth_token_url = "https://dash.cloud.example/oauth2/token"
//! oauth_client_id = "${STRATO_OAUTH_CLIENT_ID}"
//! oauth_client_secret = "${STRATO_OAUTH_CLIENT_SECRET}"
//!
//! [cookies]
//! signing_secret = "${STRATO_COOKIE_SECRET}"
//!
//! [egress]
//! allowed_hosts = ["api.cloud.example"]
//!
//! [sandbox]
//! timeout_secs = 5
//! max_heap_mb = 64
//! max_concurrent = 8
//! max_requests = 50
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors from config parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level Strato configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Upstream API and OAuth endpoints.
    pub upstream: UpstreamConfig,

    /// Cookie signing settings.
    pub cookies: CookieConfig,

    /// Outbound network policy.
    #[serde(default)]
    pub egress: EgressConfig,

    /// Sandbox execution settings.
    #[serde(default)]
    pub sandbox: SandboxOverrides,

    /// Blob store settings (API spec snapshots).
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Upstream API and OAuth provider endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream REST/GraphQL API, e.g.
    /// `https://api.cloud.example/client/v4`.
    pub api_base_url: String,

    /// Path of the upstream GraphQL endpoint, relative to the API host.
    #[serde(default = "default_graphql_path")]
    pub graphql_path: String,

    /// Upstream OAuth authorization endpoint.
    pub oauth_authorize_url: String,

    /// Upstream OAuth token endpoint.
    pub oauth_token_url: String,

    /// OAuth client id registered with the upstream provider.
    pub oauth_client_id: String,

    /// OAuth client secret. Empty for public (PKCE-only) clients.
    #[serde(default)]
    pub oauth_client_secret: String,

    /// Redirect URI this gateway registered with the upstream provider.
    pub oauth_redirect_uri: String,
}

fn default_graphql_path() -> String {
    "/client/v4/graphql".to_string()
}

/// Cookie signing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// HMAC-SHA256 key for the approved-clients cookie. Minimum 32 bytes.
    pub signing_secret: String,
}

/// Outbound network policy for sandbox-originated requests.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EgressConfig {
    /// Hostnames the gateway may reach. The upstream API host is always
    /// implied; anything else is rejected with 403.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

/// Sandbox configuration overrides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SandboxOverrides {
    /// Execution timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Maximum V8 heap size in megabytes.
    #[serde(default)]
    pub max_heap_mb: Option<usize>,

    /// Maximum concurrent sandbox executions.
    #[serde(default)]
    pub max_concurrent: Option<usize>,

    /// Maximum upstream API requests per execution.
    #[serde(default)]
    pub max_requests: Option<usize>,

    /// Execution mode: "in_process" (default) or "child_process".
    #[serde(default)]
    pub execution_mode: Option<String>,

    /// Maximum IPC message size in megabytes (child-process mode).
    #[serde(default)]
    pub max_ipc_message_size_mb: Option<usize>,
}

/// Blob store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `spec.json` and `products.json`, written by the
    /// spec population job.
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            blob_dir: default_blob_dir(),
        }
    }
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the gateway HTTP surface.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

impl GatewayConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string, expanding `${ENV_VAR}` references.
    pub fn from_toml_with_env(toml_str: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(toml_str);
        Self::from_toml(&expanded)
    }

    /// Load config from a file path, expanding environment variables.
    pub fn from_file_with_env(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_with_env(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let base = url::Url::parse(&self.upstream.api_base_url)
            .map_err(|e| ConfigError::Invalid(format!("upstream.api_base_url: {e}")))?;
        if base.host_str().is_none() {
            return Err(ConfigError::Invalid(
                "upstream.api_base_url has no host".into(),
            ));
        }
        for field in [
            ("oauth_authorize_url", &self.upstream.oauth_authorize_url),
            ("oauth_token_url", &self.upstream.oauth_token_url),
            ("oauth_redirect_uri", &self.upstream.oauth_redirect_uri),
        ] {
            url::Url::parse(field.1)
                .map_err(|e| ConfigError::Invalid(format!("upstream.{}: {e}", field.0)))?;
        }
        if self.upstream.oauth_client_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "upstream.oauth_client_id must be set".into(),
            ));
        }
        if self.cookies.signing_secret.len() < 32 {
            return Err(ConfigError::Invalid(
                "cookies.signing_secret must be at least 32 bytes".into(),
            ));
        }
        if let Some(ref mode) = self.sandbox.execution_mode {
            if mode != "in_process" && mode != "child_process" {
                return Err(ConfigError::Invalid(format!(
                    "sandbox.execution_mode: unsupported mode '{mode}', \
                     supported: in_process, child_process"
                )));
            }
        }
        Ok(())
    }

    /// The hostname of the upstream API, always implied in the egress policy.
    pub fn upstream_api_host(&self) -> String {
        url::Url::parse(&self.upstream.api_base_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

/// Expand `${ENV_VAR}` patterns in a string using environment variables.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(value) => result.push_str(&value),
                Err(_) => {
                    // Leave the placeholder if env var not found
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}
