//! Blockhash expiry predicates
//!
//! A transaction can only land while its recent blockhash is still valid.
//! Once that window closes, a transaction that was never observed will
//! never be observed, so waiting longer is pointless.

use async_trait::async_trait;

use crate::rpc::{Commitment, RpcError, RpcTransport};

/// Decides whether a transaction's validity window has closed
#[async_trait]
pub trait ExpiryPredicate: Send + Sync {
    /// Checked between polls while the transaction is still unseen
    async fn is_expired(&self, transport: &dyn RpcTransport) -> Result<bool, RpcError>;

    /// Whether an RPC error is itself proof of expiry
    fn is_expiry_signal(&self, _error: &RpcError) -> bool {
        false
    }
}

/// Expired once the chain's block height passes the blockhash's last valid height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeightExpiry {
    pub last_valid_block_height: u64,
    pub commitment: Commitment,
}

impl BlockHeightExpiry {
    pub fn new(last_valid_block_height: u64) -> Self {
        Self {
            last_valid_block_height,
            commitment: Commitment::Confirmed,
        }
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }
}

#[async_trait]
impl ExpiryPredicate for BlockHeightExpiry {
    async fn is_expired(&self, transport: &dyn RpcTransport) -> Result<bool, RpcError> {
        let height = transport.get_block_height(self.commitment).await?;
        Ok(height > self.last_valid_block_height)
    }
}

/// Expired when the node reports the blockhash as unknown
///
/// For callers that do not track the last valid block height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryOnBlockhashNotFound;

#[async_trait]
impl ExpiryPredicate for ExpiryOnBlockhashNotFound {
    async fn is_expired(&self, _transport: &dyn RpcTransport) -> Result<bool, RpcError> {
        Ok(false)
    }

    fn is_expiry_signal(&self, error: &RpcError) -> bool {
        matches!(error, RpcError::BlockhashNotFound)
    }
}

/// Durable-nonce transactions and other waits bounded only by the timeout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeverExpires;

#[async_trait]
impl ExpiryPredicate for NeverExpires {
    async fn is_expired(&self, _transport: &dyn RpcTransport) -> Result<bool, RpcError> {
        Ok(false)
    }
}
