//! Primitive wire types: public keys, blockhashes and signatures
//!
//! All three are fixed-width byte arrays copied verbatim onto the wire.
//! Their human-readable form is base58, matching what the JSON-RPC API
//! returns and accepts.

use std::fmt;
use std::str::FromStr;

use crate::errors::TransactionError;

/// Length of a public key in bytes
pub const PUBKEY_BYTES: usize = 32;

/// Length of a blockhash in bytes
pub const HASH_BYTES: usize = 32;

/// Length of a signature in bytes
pub const SIGNATURE_BYTES: usize = 64;

/// Implements the shared surface of the fixed-width byte newtypes
macro_rules! fixed_bytes_type {
    ($name:ident, $len:expr, $label:literal) => {
        impl $name {
            /// Wrap raw bytes
            pub const fn new_from_array(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw bytes
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Copy out the raw bytes
            pub fn to_bytes(self) -> [u8; $len] {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; $len])
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = TransactionError;

            fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
                <[u8; $len]>::try_from(bytes).map(Self).map_err(|_| {
                    TransactionError::MalformedData(format!(
                        "{} must be {} bytes, got {}",
                        $label,
                        $len,
                        bytes.len()
                    ))
                })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", bs58::encode(&self.0).into_string())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = TransactionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let decoded = bs58::decode(s).into_vec().map_err(|e| {
                    TransactionError::MalformedData(format!("invalid base58 {}: {}", $label, e))
                })?;
                Self::try_from(decoded.as_slice())
            }
        }
    };
}

/// 32-byte account address and signer identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; PUBKEY_BYTES]);

fixed_bytes_type!(Pubkey, PUBKEY_BYTES, "pubkey");

/// Recent blockhash referenced by a message
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_BYTES]);

fixed_bytes_type!(Hash, HASH_BYTES, "hash");

/// 64-byte ed25519 signature
///
/// The all-zero value is the placeholder for a signer slot that has not been
/// filled yet.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; SIGNATURE_BYTES]);

fixed_bytes_type!(Signature, SIGNATURE_BYTES, "signature");

impl Signature {
    /// True for the all-zero placeholder
    pub fn is_placeholder(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}
