//! Instruction model
//!
//! Instructions come from program-specific builders as opaque payloads:
//! a program id, the accounts the program touches (with the privileges it
//! needs on each) and raw data. The message builder compiles them into
//! [`CompiledInstruction`]s that reference accounts by index.

use crate::types::Pubkey;

/// An account referenced by an instruction and the privileges it requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    /// A writable account
    pub fn new(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: true,
        }
    }

    /// A read-only account
    pub fn new_readonly(pubkey: Pubkey, is_signer: bool) -> Self {
        Self {
            pubkey,
            is_signer,
            is_writable: false,
        }
    }
}

/// A single program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new_with_bytes(program_id: Pubkey, data: &[u8], accounts: Vec<AccountMeta>) -> Self {
        Self {
            program_id,
            accounts,
            data: data.to_vec(),
        }
    }
}

/// An instruction whose accounts have been replaced by indices into the
/// message's `account_keys`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_meta_constructors() {
        let key = Pubkey::new_from_array([3u8; 32]);
        let w = AccountMeta::new(key, true);
        assert!(w.is_signer && w.is_writable);

        let r = AccountMeta::new_readonly(key, false);
        assert!(!r.is_signer && !r.is_writable);
    }
}
