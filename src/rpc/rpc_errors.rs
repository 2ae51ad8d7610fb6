use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON-RPC code for a failed preflight simulation
pub const SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;
/// Node is behind or otherwise unhealthy
pub const NODE_UNHEALTHY: i64 = -32005;
/// Block not yet available on this node
pub const BLOCK_NOT_AVAILABLE: i64 = -32004;
/// Generic JSON-RPC internal error
pub const INTERNAL_ERROR: i64 = -32603;

/// Errors reported through the RPC seam
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Transport-level errors (network, connection, HTTP status)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimited { endpoint: String },

    /// JSON-RPC error object returned by the node
    #[error("RPC response error: {message} (code: {code})")]
    RpcResponse { code: i64, message: String },

    /// The node refused the transaction outright (preflight/validation)
    #[error("Transaction rejected: {message}")]
    TransactionRejected { message: String },

    /// The node does not know the referenced blockhash
    #[error("Blockhash not found")]
    BlockhashNotFound,

    /// A response that does not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A push subscription ended
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),
}

impl RpcError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Transport { .. } => true,
            RpcError::Timeout { .. } => true,
            RpcError::RateLimited { .. } => true,

            RpcError::RpcResponse { code, .. } => {
                matches!(*code, NODE_UNHEALTHY | BLOCK_NOT_AVAILABLE | INTERNAL_ERROR)
            }

            RpcError::TransactionRejected { .. } => false,
            RpcError::BlockhashNotFound => false,
            RpcError::InvalidResponse(_) => false,
            RpcError::SubscriptionClosed(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            RpcError::Transport { .. } => "transport",
            RpcError::Timeout { .. } => "timeout",
            RpcError::RateLimited { .. } => "rate_limit",
            RpcError::RpcResponse { .. } => "rpc",
            RpcError::TransactionRejected { .. } => "rejected",
            RpcError::BlockhashNotFound => "blockhash",
            RpcError::InvalidResponse(_) => "invalid_response",
            RpcError::SubscriptionClosed(_) => "subscription",
        }
    }

    /// Classify a JSON-RPC error object
    pub fn from_rpc_error(code: i64, message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("blockhash not found") {
            RpcError::BlockhashNotFound
        } else if code == SEND_TRANSACTION_PREFLIGHT_FAILURE {
            RpcError::TransactionRejected {
                message: message.to_string(),
            }
        } else {
            RpcError::RpcResponse {
                code,
                message: message.to_string(),
            }
        }
    }
}

/// Bounded exponential backoff for transient RPC failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor (0.0 - 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt number, `None` once exhausted
    pub fn calculate_delay(&self, attempt: u32) -> Option<std::time::Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        // Exponential backoff
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        // Add jitter to prevent thundering herd
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
        let jittered_delay = (delay_ms * (1.0 + jitter)).clamp(0.0, self.max_delay_ms as f64) as u64;

        Some(std::time::Duration::from_millis(jittered_delay))
    }

    /// Create a retry policy for aggressive retries
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2000,
            jitter_factor: 0.15,
            multiplier: 1.5,
        }
    }

    /// Create a retry policy for conservative retries
    pub fn conservative() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 200,
            max_delay_ms: 10000,
            jitter_factor: 0.05,
            multiplier: 3.0,
        }
    }

    /// Never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}
