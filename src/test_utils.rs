//! In-memory [`RpcTransport`] for tests
//!
//! Responses are scripted per call. Each queue replays its entries in
//! order and then keeps answering with the last one, so a test only has to
//! script the interesting prefix of a confirmation.
//!
//! Only compiled for tests or with the `test_utils` feature.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::rpc::{Commitment, LatestBlockhash, RpcError, RpcTransport, SendOptions, SignatureStatus};
use crate::transaction::Transaction;
use crate::types::{Hash, Signature};

/// Replays entries, holding on to the final one
#[derive(Debug)]
struct Script<T: Clone> {
    entries: VecDeque<T>,
}

impl<T: Clone> Default for Script<T> {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }
}

impl<T: Clone> Script<T> {
    fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
    }

    fn next(&mut self) -> Option<T> {
        if self.entries.len() > 1 {
            self.entries.pop_front()
        } else {
            self.entries.front().cloned()
        }
    }
}

type StatusEntry = Result<Option<SignatureStatus>, RpcError>;

/// Scripted transport; see the module docs for replay rules
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    sends: Mutex<Script<Result<(), RpcError>>>,
    statuses: Mutex<HashMap<Signature, Script<StatusEntry>>>,
    any_statuses: Mutex<Script<StatusEntry>>,
    block_heights: Mutex<Script<Result<u64, RpcError>>>,
    blockhashes: Mutex<Script<Result<LatestBlockhash, RpcError>>>,
    status_delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<Vec<u8>>>,
    send_calls: AtomicU32,
    status_calls: AtomicU32,
    block_height_calls: AtomicU32,
    blockhash_calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `sendTransaction` outcome; success echoes the wire signature
    pub fn push_send(&self, outcome: Result<(), RpcError>) {
        self.sends.lock().push(outcome);
    }

    /// Script a status for one signature
    pub fn push_status_for(&self, signature: Signature, status: StatusEntry) {
        self.statuses.lock().entry(signature).or_default().push(status);
    }

    /// Script a status for any signature without its own script
    pub fn push_status(&self, status: StatusEntry) {
        self.any_statuses.lock().push(status);
    }

    pub fn push_block_height(&self, height: Result<u64, RpcError>) {
        self.block_heights.lock().push(height);
    }

    pub fn push_blockhash(&self, blockhash: Result<LatestBlockhash, RpcError>) {
        self.blockhashes.lock().push(blockhash);
    }

    /// Delay every status lookup by `delay`
    pub fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock() = Some(delay);
    }

    /// Wire payloads accepted so far
    pub fn sent_transactions(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn block_height_calls(&self) -> u32 {
        self.block_height_calls.load(Ordering::SeqCst)
    }

    pub fn blockhash_calls(&self) -> u32 {
        self.blockhash_calls.load(Ordering::SeqCst)
    }

    /// A successful status at `commitment`
    pub fn status(commitment: Commitment, slot: u64) -> SignatureStatus {
        SignatureStatus {
            slot,
            confirmations: match commitment {
                Commitment::Finalized => None,
                _ => Some(1),
            },
            err: None,
            confirmation_status: Some(commitment),
        }
    }

    /// A status carrying an execution error
    pub fn failed_status(err: &str, slot: u64) -> SignatureStatus {
        SignatureStatus {
            err: Some(err.to_string()),
            ..Self::status(Commitment::Processed, slot)
        }
    }

    fn lookup(&self, signature: &Signature) -> StatusEntry {
        if let Some(script) = self.statuses.lock().get_mut(signature) {
            if let Some(entry) = script.next() {
                return entry;
            }
        }
        self.any_statuses.lock().next().unwrap_or(Ok(None))
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn send_transaction(&self, wire: &[u8], _opts: &SendOptions) -> Result<Signature, RpcError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.sends.lock().next().unwrap_or(Ok(()))?;
        let signature = Transaction::signature_from_wire(wire)
            .map_err(|e| RpcError::TransactionRejected {
                message: e.to_string(),
            })?;
        self.sent.lock().push(wire.to_vec());
        Ok(signature)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[Signature],
    ) -> Result<Vec<Option<SignatureStatus>>, RpcError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        signatures.iter().map(|sig| self.lookup(sig)).collect()
    }

    async fn get_block_height(&self, _commitment: Commitment) -> Result<u64, RpcError> {
        self.block_height_calls.fetch_add(1, Ordering::SeqCst);
        self.block_heights.lock().next().unwrap_or(Ok(0))
    }

    async fn get_latest_blockhash(&self, _commitment: Commitment) -> Result<LatestBlockhash, RpcError> {
        self.blockhash_calls.fetch_add(1, Ordering::SeqCst);
        self.blockhashes.lock().next().unwrap_or(Ok(LatestBlockhash {
            blockhash: Hash::default(),
            last_valid_block_height: 0,
        }))
    }
}
