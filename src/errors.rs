//! Error types for transaction construction
//!
//! Everything in this module is produced locally and deterministically:
//! building a message, signing, serializing and decoding never touch the
//! network. These errors indicate a programming or input error, surface
//! synchronously from the call that produced them and are never retried.

use thiserror::Error;

use crate::types::Pubkey;

/// Maximum number of distinct accounts a message can reference
///
/// Account references inside compiled instructions are single bytes.
pub const MAX_ACCOUNTS: usize = 256;

/// Error type for all construction, signing and codec operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// A message needs at least one instruction
    #[error("Message has no instructions")]
    NoInstructions,

    /// The deduplicated account set does not fit single-byte indices
    #[error("Too many accounts: {count} (max {max})", max = MAX_ACCOUNTS)]
    TooManyAccounts {
        /// Number of distinct accounts the message would need
        count: usize,
    },

    /// A supplied signer is not one of the message's required signers
    #[error("Signer {0} is not a required signer of this message")]
    UnknownSigner(Pubkey),

    /// The same signer key was supplied more than once
    #[error("Signer {0} supplied more than once")]
    DuplicateSigner(Pubkey),

    /// Serialization requires every signer slot to be filled
    #[error("Transaction is missing {missing} of {required} required signatures")]
    IncompleteSignatures {
        /// Number of placeholder slots left
        missing: usize,
        /// Number of required signatures
        required: usize,
    },

    /// Truncated buffer, width violation or inconsistent structure
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// The signer capability could not produce a signature
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// A signature does not verify against the message bytes
    #[error("Signature {index} failed verification")]
    SignatureVerificationFailed {
        /// Position of the failing signature
        index: usize,
    },
}

impl TransactionError {
    /// Construction errors are deterministic; retrying cannot help
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::NoInstructions | Self::TooManyAccounts { .. } => "message",
            Self::UnknownSigner(_)
            | Self::DuplicateSigner(_)
            | Self::IncompleteSignatures { .. }
            | Self::SigningFailed(_) => "signing",
            Self::MalformedData(_) => "codec",
            Self::SignatureVerificationFailed { .. } => "verification",
        }
    }

    /// Create a malformed-data error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedData(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransactionError::TooManyAccounts { count: 300 };
        assert_eq!(err.to_string(), "Too many accounts: 300 (max 256)");

        let err = TransactionError::IncompleteSignatures {
            missing: 1,
            required: 2,
        };
        assert_eq!(
            err.to_string(),
            "Transaction is missing 1 of 2 required signatures"
        );
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(TransactionError::NoInstructions.category(), "message");
        assert_eq!(
            TransactionError::DuplicateSigner(Pubkey::default()).category(),
            "signing"
        );
        assert_eq!(TransactionError::malformed("x").category(), "codec");
    }

    #[test]
    fn test_never_retryable() {
        assert!(!TransactionError::NoInstructions.is_retryable());
        assert!(!TransactionError::malformed("truncated").is_retryable());
    }
}
