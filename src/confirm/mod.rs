//! Confirmation Coordinator
//!
//! Submits signed transactions and drives them to a target commitment.
//!
//! ## Architecture
//!
//! - **tracker**: monotonic status state machine, published on a watch channel
//! - **expiry**: pluggable blockhash-expiry predicates
//! - **retry**: bounded backoff for transient submission failures
//! - **coordinator**: polling and subscription drivers, spawning, batching
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──> Processed ──> Confirmed ──> Finalized
//!    │            (forward only, stale observations dropped)
//!    ├──> Failed(reason)   on-chain execution error, never retried
//!    ├──> TimedOut         deadline, poll budget or transient-error budget exhausted
//!    ├──> Expired          blockhash expired before the transaction was ever seen
//!    ├──> Cancelled        the caller stopped waiting
//!    └──> Abandoned(why)   submission or tracking hit a non-retryable RPC error
//! ```
//!
//! Cancelling a wait stops polling only; a broadcast transaction cannot be
//! recalled.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfirmationConfig;
use crate::errors::TransactionError;
use crate::rpc::{Commitment, RpcError};
use crate::types::Signature;

pub mod coordinator;
pub mod expiry;
pub mod retry;
pub mod tracker;

pub use coordinator::{ConfirmRequest, ConfirmationCoordinator, ConfirmedTransaction, PendingConfirmation};
pub use expiry::{BlockHeightExpiry, ExpiryOnBlockhashNotFound, ExpiryPredicate, NeverExpires};
pub use tracker::{Observation, StatusTracker};

/// Where a submitted transaction currently stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    Pending,
    Processed,
    Confirmed,
    Finalized,
    Failed(String),
    TimedOut,
    Expired,
    Cancelled,
    /// Tracking stopped on an RPC error; the on-chain outcome is unknown
    Abandoned(String),
}

impl ConfirmationStatus {
    /// Commitment rank of the progress states
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processed => Some(1),
            Self::Confirmed => Some(2),
            Self::Finalized => Some(3),
            Self::Failed(_) | Self::TimedOut | Self::Expired | Self::Cancelled | Self::Abandoned(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank().is_none()
    }

    /// Commitment this status proves, if any
    pub fn commitment(&self) -> Option<Commitment> {
        match self {
            Self::Processed => Some(Commitment::Processed),
            Self::Confirmed => Some(Commitment::Confirmed),
            Self::Finalized => Some(Commitment::Finalized),
            _ => None,
        }
    }

    /// True once the transaction has been seen at or above `target`
    pub fn reached(&self, target: Commitment) -> bool {
        self.commitment().is_some_and(|c| c >= target)
    }
}

impl From<Commitment> for ConfirmationStatus {
    fn from(commitment: Commitment) -> Self {
        match commitment {
            Commitment::Processed => Self::Processed,
            Commitment::Confirmed => Self::Confirmed,
            Commitment::Finalized => Self::Finalized,
        }
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Processed => f.write_str("processed"),
            Self::Confirmed => f.write_str("confirmed"),
            Self::Finalized => f.write_str("finalized"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::TimedOut => f.write_str("timed out"),
            Self::Expired => f.write_str("expired"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Abandoned(reason) => write!(f, "abandoned: {}", reason),
        }
    }
}

/// Per-call confirmation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmParams {
    /// Commitment to wait for
    pub commitment: Commitment,
    /// Overall budget for the wait
    pub timeout: Duration,
    /// Delay between status polls
    pub poll_interval: Duration,
    /// Optional cap on the number of status polls
    pub max_polls: Option<u32>,
    /// Consecutive transient RPC failures tolerated before giving up
    pub max_transient_retries: u32,
}

impl Default for ConfirmParams {
    fn default() -> Self {
        Self::from(&ConfirmationConfig::default())
    }
}

impl From<&ConfirmationConfig> for ConfirmParams {
    fn from(config: &ConfirmationConfig) -> Self {
        Self {
            commitment: config.commitment,
            timeout: Duration::from_secs(config.timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
            max_transient_retries: config.max_transient_retries,
        }
    }
}

impl ConfirmParams {
    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Terminal value of a confirmation wait that did not reach its target
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmError {
    /// The network executed or rejected the transaction with an error
    #[error("Transaction {signature} failed: {reason}")]
    Failed { signature: Signature, reason: String },

    /// Local deadline or retry budget exhausted; re-poll or resend with a fresh blockhash
    #[error("Transaction {signature} not confirmed in time (last status: {last_status})")]
    TimedOut {
        signature: Signature,
        last_status: ConfirmationStatus,
    },

    /// Blockhash expired before the transaction was ever observed; re-check before resending
    #[error("Blockhash expired before transaction {signature} was observed; outcome uncertain")]
    Expired { signature: Signature },

    /// The caller stopped waiting
    #[error("Confirmation of {signature} cancelled")]
    Cancelled { signature: Signature },

    /// The transaction could not be handed to the node
    #[error("Submission of {signature} failed: {source}")]
    Submission {
        signature: Signature,
        #[source]
        source: RpcError,
    },

    /// A non-retryable RPC error interrupted status tracking
    #[error("RPC error while confirming {signature}: {source}")]
    Rpc {
        signature: Signature,
        #[source]
        source: RpcError,
    },

    /// The bytes handed in are not a signed transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(#[from] TransactionError),

    /// The background confirmation task panicked or was aborted
    #[error("Confirmation task for {signature} aborted: {reason}")]
    TaskAborted { signature: Signature, reason: String },
}

impl ConfirmError {
    /// Signature this error is about, when known
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::Failed { signature, .. }
            | Self::TimedOut { signature, .. }
            | Self::Expired { signature }
            | Self::Cancelled { signature }
            | Self::Submission { signature, .. }
            | Self::Rpc { signature, .. }
            | Self::TaskAborted { signature, .. } => Some(signature),
            Self::InvalidTransaction(_) => None,
        }
    }

    /// Status published to observers when a wait ends with this error
    pub fn terminal_status(&self) -> ConfirmationStatus {
        match self {
            Self::Failed { reason, .. } => ConfirmationStatus::Failed(reason.clone()),
            Self::TimedOut { .. } => ConfirmationStatus::TimedOut,
            Self::Expired { .. } => ConfirmationStatus::Expired,
            Self::Cancelled { .. } => ConfirmationStatus::Cancelled,
            Self::Submission { source, .. } | Self::Rpc { source, .. } => {
                ConfirmationStatus::Abandoned(source.to_string())
            }
            Self::InvalidTransaction(e) => ConfirmationStatus::Abandoned(e.to_string()),
            Self::TaskAborted { reason, .. } => ConfirmationStatus::Abandoned(reason.clone()),
        }
    }

    /// Whether polling again later could still observe the target
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TimedOut { .. } | Self::Cancelled { .. } => true,
            Self::Submission { source, .. } | Self::Rpc { source, .. } => source.is_retryable(),
            Self::Failed { .. }
            | Self::Expired { .. }
            | Self::InvalidTransaction(_)
            | Self::TaskAborted { .. } => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
            Self::Expired { .. } => "expired",
            Self::Cancelled { .. } => "cancelled",
            Self::Submission { .. } => "submission",
            Self::Rpc { .. } => "rpc",
            Self::InvalidTransaction(_) => "invalid_transaction",
            Self::TaskAborted { .. } => "aborted",
        }
    }
}
