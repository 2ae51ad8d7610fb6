//! Canonical message construction and encoding
//!
//! A message is the unsigned payload that every signer signs. Its account
//! list is ordered in four buckets which the runtime relies on to derive
//! each account's privileges from its position:
//!
//! ```text
//! [ fee payer | signers (writable, then read-only) | writable non-signers | read-only non-signers ]
//! ```
//!
//! Within each bucket accounts keep the order in which they were first
//! referenced, so the same instruction set and blockhash always compile to
//! byte-identical messages.
//!
//! Wire layout:
//!
//! ```text
//! num_required_signatures        u8
//! num_readonly_signed_accounts   u8
//! num_readonly_unsigned_accounts u8
//! account_keys                   compact-u16 len, 32 bytes each
//! recent_blockhash               32 bytes
//! instructions                   compact-u16 len, then per instruction:
//!   program_id_index             u8
//!   accounts                     compact-u16 len, u8 each
//!   data                         compact-u16 len, raw bytes
//! ```

use std::collections::HashMap;

use crate::codec::{encode_len, WireReader};
use crate::errors::{TransactionError, MAX_ACCOUNTS};
use crate::instruction::{CompiledInstruction, Instruction};
use crate::types::{Hash, Pubkey};

/// Privilege counts that let the runtime classify `account_keys` by index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    /// Leading accounts that must sign
    pub num_required_signatures: u8,
    /// Trailing accounts among the signers that are read-only
    pub num_readonly_signed_accounts: u8,
    /// Trailing accounts among the non-signers that are read-only
    pub num_readonly_unsigned_accounts: u8,
}

/// Unsigned transaction payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

/// Merged privileges of one account across all instructions
#[derive(Debug, Clone, Copy)]
struct KeyMeta {
    pubkey: Pubkey,
    is_signer: bool,
    is_writable: bool,
}

/// First-seen ordered, deduplicated account set
#[derive(Debug, Default)]
struct KeySet {
    metas: Vec<KeyMeta>,
    positions: HashMap<Pubkey, usize>,
}

impl KeySet {
    fn insert(&mut self, pubkey: Pubkey, is_signer: bool, is_writable: bool) {
        match self.positions.get(&pubkey) {
            Some(&pos) => {
                let meta = &mut self.metas[pos];
                meta.is_signer |= is_signer;
                meta.is_writable |= is_writable;
            }
            None => {
                self.positions.insert(pubkey, self.metas.len());
                self.metas.push(KeyMeta {
                    pubkey,
                    is_signer,
                    is_writable,
                });
            }
        }
    }
}

impl Message {
    /// Compile `instructions` into a canonical message paid for by `payer`
    pub fn new_with_blockhash(
        instructions: &[Instruction],
        payer: &Pubkey,
        recent_blockhash: &Hash,
    ) -> Result<Self, TransactionError> {
        if instructions.is_empty() {
            return Err(TransactionError::NoInstructions);
        }

        let mut keys = KeySet::default();
        keys.insert(*payer, true, true);
        for ix in instructions {
            for meta in &ix.accounts {
                keys.insert(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            keys.insert(ix.program_id, false, false);
        }

        if keys.metas.len() > MAX_ACCOUNTS {
            return Err(TransactionError::TooManyAccounts {
                count: keys.metas.len(),
            });
        }

        // payer stays at index 0; the rest are stably partitioned
        let (payer_meta, rest) = keys.metas.split_at(1);
        let bucket = |signer: bool, writable: bool| {
            rest.iter()
                .filter(move |m| m.is_signer == signer && m.is_writable == writable)
                .map(|m| m.pubkey)
        };
        let writable_signers: Vec<Pubkey> = bucket(true, true).collect();
        let readonly_signers: Vec<Pubkey> = bucket(true, false).collect();
        let writable_unsigned: Vec<Pubkey> = bucket(false, true).collect();
        let readonly_unsigned: Vec<Pubkey> = bucket(false, false).collect();

        let count = |n: usize| {
            u8::try_from(n).map_err(|_| TransactionError::TooManyAccounts {
                count: keys.metas.len(),
            })
        };
        let header = MessageHeader {
            num_required_signatures: count(1 + writable_signers.len() + readonly_signers.len())?,
            num_readonly_signed_accounts: count(readonly_signers.len())?,
            num_readonly_unsigned_accounts: count(readonly_unsigned.len())?,
        };

        let account_keys: Vec<Pubkey> = std::iter::once(payer_meta[0].pubkey)
            .chain(writable_signers)
            .chain(readonly_signers)
            .chain(writable_unsigned)
            .chain(readonly_unsigned)
            .collect();

        let index_of: HashMap<Pubkey, u8> = account_keys
            .iter()
            .enumerate()
            .map(|(i, key)| (*key, i as u8))
            .collect();

        let instructions = instructions
            .iter()
            .map(|ix| compile_instruction(ix, &index_of))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            header,
            account_keys,
            recent_blockhash: *recent_blockhash,
            instructions,
        })
    }

    /// The account paying fees, always the first key
    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.account_keys.first()
    }

    /// Keys whose signatures the transaction must carry, in slot order
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.header.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let num_signers = self.header.num_required_signatures as usize;
        if index >= self.account_keys.len() {
            return false;
        }
        // unsanitized headers may claim more read-only accounts than exist
        if index < num_signers {
            index < num_signers.saturating_sub(self.header.num_readonly_signed_accounts as usize)
        } else {
            index
                < self
                    .account_keys
                    .len()
                    .saturating_sub(self.header.num_readonly_unsigned_accounts as usize)
        }
    }

    /// Encode to the canonical wire bytes that signers sign
    pub fn serialize(&self) -> Result<Vec<u8>, TransactionError> {
        let mut buf = Vec::with_capacity(
            3 + 3 + self.account_keys.len() * 32 + 32 + 3 + self.instructions.len() * 8,
        );
        buf.push(self.header.num_required_signatures);
        buf.push(self.header.num_readonly_signed_accounts);
        buf.push(self.header.num_readonly_unsigned_accounts);

        encode_len(&mut buf, self.account_keys.len())?;
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(self.recent_blockhash.as_bytes());

        encode_len(&mut buf, self.instructions.len())?;
        for ix in &self.instructions {
            buf.push(ix.program_id_index);
            encode_len(&mut buf, ix.accounts.len())?;
            buf.extend_from_slice(&ix.accounts);
            encode_len(&mut buf, ix.data.len())?;
            buf.extend_from_slice(&ix.data);
        }

        Ok(buf)
    }

    /// Decode a message that must occupy all of `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut reader = WireReader::new(bytes);
        let message = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }

    /// Decode a message from the cursor and sanitize it
    pub(crate) fn decode(reader: &mut WireReader<'_>) -> Result<Self, TransactionError> {
        let header = MessageHeader {
            num_required_signatures: reader.read_u8()?,
            num_readonly_signed_accounts: reader.read_u8()?,
            num_readonly_unsigned_accounts: reader.read_u8()?,
        };

        let num_keys = reader.read_compact_u16()? as usize;
        let mut account_keys = Vec::with_capacity(num_keys.min(MAX_ACCOUNTS));
        for _ in 0..num_keys {
            account_keys.push(Pubkey::new_from_array(reader.read_array()?));
        }

        let recent_blockhash = Hash::new_from_array(reader.read_array()?);

        let num_instructions = reader.read_compact_u16()? as usize;
        let mut instructions = Vec::with_capacity(num_instructions.min(64));
        for _ in 0..num_instructions {
            let program_id_index = reader.read_u8()?;
            let accounts = reader.read_len_prefixed()?.to_vec();
            let data = reader.read_len_prefixed()?.to_vec();
            instructions.push(CompiledInstruction {
                program_id_index,
                accounts,
                data,
            });
        }

        let message = Self {
            header,
            account_keys,
            recent_blockhash,
            instructions,
        };
        message.sanitize()?;
        Ok(message)
    }

    /// Check that the header and instruction indices are consistent with the key list
    pub fn sanitize(&self) -> Result<(), TransactionError> {
        let num_keys = self.account_keys.len();
        let h = &self.header;

        if num_keys > MAX_ACCOUNTS {
            return Err(TransactionError::TooManyAccounts { count: num_keys });
        }
        if h.num_required_signatures == 0 {
            return Err(TransactionError::malformed("message has no signers"));
        }
        if h.num_readonly_signed_accounts >= h.num_required_signatures {
            return Err(TransactionError::malformed(
                "fee payer cannot be a read-only signer",
            ));
        }
        if h.num_required_signatures as usize + h.num_readonly_unsigned_accounts as usize
            > num_keys
        {
            return Err(TransactionError::malformed(format!(
                "header counts exceed {} account keys",
                num_keys
            )));
        }

        for (i, ix) in self.instructions.iter().enumerate() {
            let out_of_range = std::iter::once(&ix.program_id_index)
                .chain(ix.accounts.iter())
                .any(|&idx| idx as usize >= num_keys);
            if out_of_range {
                return Err(TransactionError::malformed(format!(
                    "instruction {} references an account index out of range",
                    i
                )));
            }
        }

        Ok(())
    }
}

fn compile_instruction(
    ix: &Instruction,
    index_of: &HashMap<Pubkey, u8>,
) -> Result<CompiledInstruction, TransactionError> {
    if ix.data.len() > u16::MAX as usize || ix.accounts.len() > u16::MAX as usize {
        return Err(TransactionError::malformed(format!(
            "instruction for program {} does not fit compact-u16 lengths",
            ix.program_id
        )));
    }
    // every key was inserted above, so lookups cannot miss
    let lookup = |key: &Pubkey| {
        index_of
            .get(key)
            .copied()
            .ok_or_else(|| TransactionError::malformed(format!("account {} not compiled", key)))
    };

    Ok(CompiledInstruction {
        program_id_index: lookup(&ix.program_id)?,
        accounts: ix
            .accounts
            .iter()
            .map(|meta| lookup(&meta.pubkey))
            .collect::<Result<Vec<_>, _>>()?,
        data: ix.data.clone(),
    })
}
