//! RPC seam
//!
//! The confirmation coordinator talks to the network only through
//! [`RpcTransport`]. Implementations must be safe to share between many
//! in-flight confirmation loops.
//!
//! - `http`: JSON-RPC 2.0 over HTTP (reqwest)
//! - `pubsub`: websocket signature subscriptions (tokio-tungstenite)
//! - `rpc_errors`: error taxonomy and retry policy

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Hash, Signature};

pub mod http;
pub mod pubsub;
pub mod rpc_errors;

pub use http::HttpTransport;
pub use pubsub::{PubsubClient, SignatureSubscription};
pub use rpc_errors::{RetryPolicy, RpcError};

/// How irreversible an observed transaction state is
///
/// Variants are declared in rank order so `Ord` compares confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

impl Default for Commitment {
    fn default() -> Self {
        Self::Finalized
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(RpcError::InvalidResponse(format!(
                "unknown commitment level '{}'",
                other
            ))),
        }
    }
}

/// One observation of a transaction's status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureStatus {
    pub slot: u64,
    /// Blocks confirmed on top; `None` once rooted
    pub confirmations: Option<u64>,
    /// On-chain execution error, verbatim from the network
    pub err: Option<String>,
    pub confirmation_status: Option<Commitment>,
}

impl SignatureStatus {
    /// Commitment level this observation proves
    ///
    /// Older nodes omit `confirmationStatus`; a rooted status
    /// (`confirmations == None`) is then finalized.
    pub fn commitment(&self) -> Commitment {
        match (self.confirmation_status, self.confirmations) {
            (Some(c), _) => c,
            (None, None) => Commitment::Finalized,
            (None, Some(_)) => Commitment::Processed,
        }
    }
}

/// Result of `getLatestBlockhash`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestBlockhash {
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
}

/// Options forwarded with `sendTransaction`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Skip the node's preflight simulation
    #[serde(default)]
    pub skip_preflight: bool,
    /// Commitment the preflight simulation runs against
    #[serde(default)]
    pub preflight_commitment: Option<Commitment>,
    /// How many times the node itself rebroadcasts
    #[serde(default)]
    pub max_retries: Option<usize>,
    /// Return right after submission without waiting for confirmation
    #[serde(default)]
    pub skip_confirmation: bool,
}

/// Request/response transport to a network node
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Submit serialized transaction bytes; returns the transaction id
    async fn send_transaction(
        &self,
        wire: &[u8],
        opts: &SendOptions,
    ) -> Result<Signature, RpcError>;

    /// Look up statuses; `None` entries are unknown to the node
    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>, RpcError>;

    async fn get_block_height(&self, commitment: Commitment) -> Result<u64, RpcError>;

    async fn get_latest_blockhash(&self, commitment: Commitment)
        -> Result<LatestBlockhash, RpcError>;
}
