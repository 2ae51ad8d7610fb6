//! Signed transactions
//!
//! A transaction pairs a [`Message`] with one signature slot per required
//! signer. Slots start as all-zero placeholders and are filled by signing
//! the full canonical message bytes, never any earlier partial state.
//!
//! Wire layout:
//!
//! ```text
//! signatures   compact-u16 len, 64 bytes each (slot order = signer prefix of account_keys)
//! message      see `message` module
//! ```

use std::collections::HashSet;

use crate::codec::{encode_len, WireReader};
use crate::errors::TransactionError;
use crate::message::Message;
use crate::signer::{verify_signature, Signer};
use crate::types::{Pubkey, Signature};

/// Message plus its signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    /// Wrap a message with placeholder signatures for every required signer
    pub fn new_unsigned(message: Message) -> Self {
        let required = message.header.num_required_signatures as usize;
        Self {
            signatures: vec![Signature::default(); required],
            message,
        }
    }

    /// Build and sign in one step; every required signer must be supplied
    pub fn new_signed(message: Message, signers: &[&dyn Signer]) -> Result<Self, TransactionError> {
        let mut tx = Self::new_unsigned(message);
        tx.sign(signers)?;
        if !tx.is_fully_signed() {
            return Err(tx.incomplete());
        }
        Ok(tx)
    }

    /// Sign with each of `signers`, placing signatures at their slots
    ///
    /// Slots for signers not supplied are left untouched, so several parties
    /// can sign the same transaction in turn. All signers are validated
    /// before any slot is written.
    pub fn sign(&mut self, signers: &[&dyn Signer]) -> Result<(), TransactionError> {
        let positions = self.signer_positions(signers)?;
        let message_bytes = self.message.serialize()?;

        for (signer, slot) in signers.iter().zip(positions) {
            let signature = signer
                .try_sign_message(&message_bytes)
                .map_err(|e| TransactionError::SigningFailed(e.to_string()))?;
            self.signatures[slot] = signature;
        }
        Ok(())
    }

    /// Same as [`Transaction::sign`]; kept for callers that sign in several rounds
    pub fn partial_sign(&mut self, signers: &[&dyn Signer]) -> Result<(), TransactionError> {
        self.sign(signers)
    }

    /// Attach a signature produced elsewhere
    pub fn add_signature(&mut self, pubkey: &Pubkey, signature: Signature) -> Result<(), TransactionError> {
        let slot = self.slot_of(pubkey)?;
        self.signatures[slot] = signature;
        Ok(())
    }

    /// True when no signer slot holds a placeholder
    pub fn is_fully_signed(&self) -> bool {
        self.signatures.len() == self.message.header.num_required_signatures as usize
            && self.signatures.iter().all(|sig| !sig.is_placeholder())
    }

    /// The transaction id: its first signature, once present
    pub fn signature(&self) -> Option<&Signature> {
        self.signatures.first().filter(|sig| !sig.is_placeholder())
    }

    /// Encode the final wire payload
    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        if !self.is_fully_signed() {
            return Err(self.incomplete());
        }

        let message_bytes = self.message.serialize()?;
        let mut buf = Vec::with_capacity(3 + self.signatures.len() * 64 + message_bytes.len());
        encode_len(&mut buf, self.signatures.len())?;
        for sig in &self.signatures {
            buf.extend_from_slice(sig.as_bytes());
        }
        buf.extend_from_slice(&message_bytes);
        Ok(buf)
    }

    /// Decode a wire payload
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = WireReader::new(bytes);

        let count = reader.read_compact_u16()? as usize;
        let mut signatures = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            signatures.push(Signature::new_from_array(reader.read_array()?));
        }

        let message = Message::decode(&mut reader)?;
        reader.finish()?;

        if signatures.len() != message.header.num_required_signatures as usize {
            return Err(TransactionError::malformed(format!(
                "{} signatures for {} required signers",
                signatures.len(),
                message.header.num_required_signatures
            )));
        }

        Ok(Self {
            signatures,
            message,
        })
    }

    /// Transaction id of a fully signed wire payload
    pub fn signature_from_wire(bytes: &[u8]) -> Result<Signature, TransactionError> {
        let tx = Self::deserialize(bytes)?;
        match tx.signature() {
            Some(sig) if tx.is_fully_signed() => Ok(*sig),
            _ => Err(tx.incomplete()),
        }
    }

    /// Check every signature against the serialized message
    pub fn verify(&self) -> Result<(), TransactionError> {
        let message_bytes = self.message.serialize()?;
        let keys = self.message.signer_keys();
        if keys.len() != self.signatures.len() {
            return Err(self.incomplete());
        }
        for (index, (key, sig)) in keys.iter().zip(&self.signatures).enumerate() {
            if !verify_signature(key, &message_bytes, sig) {
                return Err(TransactionError::SignatureVerificationFailed { index });
            }
        }
        Ok(())
    }

    fn slot_of(&self, pubkey: &Pubkey) -> Result<usize, TransactionError> {
        self.message
            .signer_keys()
            .iter()
            .position(|k| k == pubkey)
            .ok_or(TransactionError::UnknownSigner(*pubkey))
    }

    fn signer_positions(&self, signers: &[&dyn Signer]) -> Result<Vec<usize>, TransactionError> {
        let mut seen = HashSet::with_capacity(signers.len());
        signers
            .iter()
            .map(|signer| {
                let pubkey = signer.pubkey();
                if !seen.insert(pubkey) {
                    return Err(TransactionError::DuplicateSigner(pubkey));
                }
                self.slot_of(&pubkey)
            })
            .collect()
    }

    fn incomplete(&self) -> TransactionError {
        let required = self.message.header.num_required_signatures as usize;
        let present = self
            .signatures
            .iter()
            .take(required)
            .filter(|sig| !sig.is_placeholder())
            .count();
        TransactionError::IncompleteSignatures {
            missing: required - present,
            required,
        }
    }
}
