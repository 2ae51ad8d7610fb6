//! Configuration module
//!
//! Handles configuration loading from TOML files and environment
//! variables. Every field has a serde default, so an empty file is a valid
//! configuration pointing at a local validator.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc::{Commitment, RetryPolicy};

/// Environment override for `rpc.url`
pub const ENV_RPC_URL: &str = "SOLTX_RPC_URL";
/// Environment override for `rpc.ws_url`
pub const ENV_WS_URL: &str = "SOLTX_WS_URL";
/// Environment override for both commitment levels
pub const ENV_COMMITMENT: &str = "SOLTX_COMMITMENT";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Main client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// RPC endpoint configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Confirmation defaults
    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    /// Backoff for transient RPC failures
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub blockhash_cache: BlockhashCacheConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC HTTP endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Websocket endpoint for subscriptions
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,

    /// Commitment for blockhash and block height queries
    #[serde(default = "default_query_commitment")]
    pub commitment: Commitment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Commitment a confirmation waits for
    #[serde(default)]
    pub commitment: Commitment,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirm_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional cap on status polls per confirmation
    #[serde(default)]
    pub max_polls: Option<u32>,

    /// Consecutive transient RPC failures tolerated while polling
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,

    /// Confirmations in flight for batch operations
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockhashCacheConfig {
    /// Whether `TransactionClient` reuses recent blockhashes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long a fetched blockhash is reused
    #[serde(default = "default_blockhash_ttl_ms")]
    pub ttl_ms: u64,
}

// Default value functions
fn default_rpc_url() -> String { "http://127.0.0.1:8899".to_string() }
fn default_rpc_timeout_ms() -> u64 { 10_000 }
fn default_query_commitment() -> Commitment { Commitment::Confirmed }
fn default_poll_interval_ms() -> u64 { 500 }
fn default_confirm_timeout_secs() -> u64 { 30 }
fn default_max_transient_retries() -> u32 { 5 }
fn default_concurrency_limit() -> usize { 16 }
fn default_blockhash_ttl_ms() -> u64 { 60_000 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            ws_url: None,
            timeout_ms: default_rpc_timeout_ms(),
            commitment: default_query_commitment(),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            commitment: Commitment::default(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_confirm_timeout_secs(),
            max_polls: None,
            max_transient_retries: default_max_transient_retries(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

impl Default for BlockhashCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ttl_ms: default_blockhash_ttl_ms(),
        }
    }
}

impl RpcConfig {
    /// Websocket endpoint, derived from the HTTP one when not configured
    pub fn websocket_url(&self) -> String {
        if let Some(ws) = &self.ws_url {
            return ws.clone();
        }
        if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.url.clone()
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults plus environment overrides (reads `.env` if present)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, normally the process environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(ws) = lookup(ENV_WS_URL) {
            self.rpc.ws_url = Some(ws);
        }
        if let Some(level) = lookup(ENV_COMMITMENT) {
            let commitment: Commitment = level
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid("commitment", format!("unknown level '{}'", level)))?;
            self.confirmation.commitment = commitment;
            self.rpc.commitment = commitment;
        }
        Ok(())
    }

    /// Reject values the client cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rpc.url.starts_with("http://") || self.rpc.url.starts_with("https://")) {
            return Err(ConfigError::invalid("rpc.url", "must be an http(s) URL"));
        }
        if let Some(ws) = &self.rpc.ws_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                return Err(ConfigError::invalid("rpc.ws_url", "must be a ws(s) URL"));
            }
        }
        if self.rpc.timeout_ms == 0 {
            return Err(ConfigError::invalid("rpc.timeout_ms", "must be positive"));
        }
        if self.confirmation.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("confirmation.poll_interval_ms", "must be positive"));
        }
        if self.confirmation.timeout_secs == 0 {
            return Err(ConfigError::invalid("confirmation.timeout_secs", "must be positive"));
        }
        if self.confirmation.concurrency_limit == 0 {
            return Err(ConfigError::invalid("confirmation.concurrency_limit", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::invalid("retry.jitter_factor", "must be within 0.0..=1.0"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.multiplier", "must be at least 1.0"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::invalid("retry.base_delay_ms", "exceeds retry.max_delay_ms"));
        }
        Ok(())
    }
}
