//! Signer abstraction
//!
//! The transaction layer only needs one capability from a signer: given the
//! canonical message bytes, produce a 64-byte signature for its public key.
//! This module provides:
//! - `Keypair`: local ed25519 keypair
//! - `Presigner`: a signature produced elsewhere (hardware or remote wallet)
//! - `verify_signature`: ed25519 verification used by `Transaction::verify`

use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use thiserror::Error;

use crate::types::{Pubkey, Signature};

/// Errors a signer capability can report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("Keypair file error: {0}")]
    Io(String),

    #[error("Signer unavailable: {0}")]
    Unavailable(String),
}

/// Capability to sign message bytes for one public key
pub trait Signer: Send + Sync {
    /// Get the public key of this signer
    fn pubkey(&self) -> Pubkey;

    /// Sign the exact bytes given
    fn try_sign_message(&self, message: &[u8]) -> Result<Signature, SignerError>;
}

/// Local ed25519 keypair
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair
    pub fn new() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(&seed)
    }

    /// Derive a keypair from a 32-byte secret seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load from the 64-byte `secret || public` layout used by keypair files
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        if bytes.len() != 64 {
            return Err(SignerError::InvalidKeypair(format!(
                "expected 64 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|&b| b == 0) {
            return Err(SignerError::InvalidKeypair(
                "all-zero key rejected".to_string(),
            ));
        }

        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let keypair = Self::from_seed(&seed);

        if keypair.pubkey().as_bytes()[..] != bytes[32..] {
            return Err(SignerError::InvalidKeypair(
                "public half does not match secret".to_string(),
            ));
        }
        Ok(keypair)
    }

    /// The 64-byte `secret || public` encoding
    pub fn to_bytes(&self) -> [u8; 64] {
        self.signing_key.to_keypair_bytes()
    }

    /// Read a keypair stored as a JSON array of 64 numbers
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| SignerError::Io(format!("{}: {}", path.display(), e)))?;
        let bytes: Vec<u8> = serde_json::from_str(&contents)
            .map_err(|e| SignerError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }
}

impl Default for Keypair {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("pubkey", &self.pubkey())
            .finish_non_exhaustive()
    }
}

impl Signer for Keypair {
    fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.signing_key.verifying_key().to_bytes())
    }

    fn try_sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        Ok(Signature::new_from_array(
            self.signing_key.sign(message).to_bytes(),
        ))
    }
}

/// A signature obtained out of band for a known public key
#[derive(Debug, Clone, Copy)]
pub struct Presigner {
    pubkey: Pubkey,
    signature: Signature,
}

impl Presigner {
    pub fn new(pubkey: Pubkey, signature: Signature) -> Self {
        Self { pubkey, signature }
    }
}

impl Signer for Presigner {
    fn pubkey(&self) -> Pubkey {
        self.pubkey
    }

    fn try_sign_message(&self, message: &[u8]) -> Result<Signature, SignerError> {
        if !verify_signature(&self.pubkey, message, &self.signature) {
            return Err(SignerError::Unavailable(format!(
                "presigned signature for {} does not match this message",
                self.pubkey
            )));
        }
        Ok(self.signature)
    }
}

/// Check an ed25519 signature; malformed keys simply fail verification
pub fn verify_signature(pubkey: &Pubkey, message: &[u8], signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(pubkey.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let kp = Keypair::new();
        let sig = kp.try_sign_message(b"hello").unwrap();
        assert!(verify_signature(&kp.pubkey(), b"hello", &sig));
        assert!(!verify_signature(&kp.pubkey(), b"hellp", &sig));
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let a = Keypair::from_seed(&[42u8; 32]);
        let b = Keypair::from_seed(&[42u8; 32]);
        assert_eq!(a.pubkey(), b.pubkey());
        assert_eq!(
            a.try_sign_message(b"m").unwrap(),
            b.try_sign_message(b"m").unwrap()
        );
    }

    #[test]
    fn test_from_bytes_roundtrip_and_validation() {
        let kp = Keypair::from_seed(&[9u8; 32]);
        let restored = Keypair::from_bytes(&kp.to_bytes()).unwrap();
        assert_eq!(restored.pubkey(), kp.pubkey());

        assert!(Keypair::from_bytes(&[1u8; 63]).is_err());
        assert!(Keypair::from_bytes(&[0u8; 64]).is_err());

        let mut mismatched = kp.to_bytes();
        mismatched[40] ^= 0xff;
        assert!(Keypair::from_bytes(&mismatched).is_err());
    }

    #[test]
    fn test_read_from_file() {
        let kp = Keypair::from_seed(&[3u8; 32]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        let json = serde_json::to_string(&kp.to_bytes().to_vec()).unwrap();
        std::fs::write(&path, json).unwrap();

        let loaded = Keypair::read_from_file(&path).unwrap();
        assert_eq!(loaded.pubkey(), kp.pubkey());

        assert!(matches!(
            Keypair::read_from_file(dir.path().join("missing.json")),
            Err(SignerError::Io(_))
        ));
    }

    #[test]
    fn test_presigner_checks_message() {
        let kp = Keypair::new();
        let sig = kp.try_sign_message(b"payload").unwrap();
        let presigner = Presigner::new(kp.pubkey(), sig);

        assert_eq!(presigner.try_sign_message(b"payload").unwrap(), sig);
        assert!(presigner.try_sign_message(b"other").is_err());
    }
}
