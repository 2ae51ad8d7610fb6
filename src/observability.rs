//! Observability module for correlation and tracing

use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

use crate::types::Signature;

/// Correlation ID for tracking one transaction across submit, polls and retries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Span covering everything done on behalf of one transaction
pub fn transaction_span(operation: &'static str, signature: &Signature, correlation_id: &CorrelationId) -> Span {
    tracing::info_span!(
        "transaction",
        operation,
        signature = %signature,
        correlation_id = %correlation_id,
    )
}
