//! soltx - transaction construction and confirmation tracking
//!
//! Builds Solana-style legacy messages and transactions byte for byte,
//! signs them, submits them over JSON-RPC and follows them to a target
//! commitment.
//!
//! Layers, bottom up:
//! - `types`, `codec`: fixed-width keys/hashes/signatures and compact-u16 framing
//! - `instruction`, `message`, `transaction`: account ordering, header, wire format
//! - `signer`: signing capability (ed25519 keypairs, presigned signatures)
//! - `rpc`: transport seam, HTTP JSON-RPC and websocket subscriptions
//! - `confirm`: monotonic confirmation tracking with expiry, retries and cancellation
//! - `client`: blockhash caching and the build-send-confirm facade

pub mod blockhash_cache;
pub mod client;
pub mod codec;
pub mod config;
pub mod confirm;
pub mod errors;
pub mod instruction;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod observability;
pub mod rpc;
pub mod signer;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use client::{ClientError, TransactionClient};
pub use config::ClientConfig;
pub use confirm::{
    BlockHeightExpiry, ConfirmError, ConfirmParams, ConfirmationCoordinator, ConfirmationStatus,
    ExpiryOnBlockhashNotFound, ExpiryPredicate, NeverExpires, PendingConfirmation,
};
pub use errors::TransactionError;
pub use instruction::{AccountMeta, CompiledInstruction, Instruction};
pub use message::{Message, MessageHeader};
pub use rpc::{Commitment, RpcError, RpcTransport, SendOptions, SignatureStatus};
pub use signer::{Keypair, Presigner, Signer, SignerError};
pub use transaction::Transaction;
pub use types::{Hash, Pubkey, Signature};
