//! Recent blockhash reuse
//!
//! Fetching a blockhash for every transaction doubles the RPC traffic of a
//! busy sender. A blockhash stays usable for roughly a minute, so the cache
//! keeps a few of them around.
//!
//! Two identical instruction sets signed against the same blockhash produce
//! the same transaction, and the network drops the second one as a
//! duplicate. Entries are therefore marked used once a build takes them:
//! [`BlockhashCache::acquire`] hands out the oldest unused entry and only
//! fetches when none is left. [`BlockhashCache::refresh`] tops the cache up
//! after a submission so the next build usually finds an unused entry
//! without waiting on the node.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::rpc::{Commitment, LatestBlockhash, RpcError, RpcTransport};

/// Entries kept at most; older ones are dropped first
const MAX_ENTRIES: usize = 16;

#[derive(Debug, Clone, Copy)]
struct CachedBlockhash {
    latest: LatestBlockhash,
    fetched_at: Instant,
    used: bool,
}

/// Recent blockhashes, oldest first, with per-entry usage tracking
#[derive(Debug)]
pub struct BlockhashCache {
    ttl: Duration,
    entries: RwLock<VecDeque<CachedBlockhash>>,
}

impl BlockhashCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CachedBlockhash) -> bool {
        entry.fetched_at.elapsed() < self.ttl
    }

    /// Newest cached value still younger than the TTL; does not mark it used
    pub fn get(&self) -> Option<LatestBlockhash> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|entry| self.is_fresh(entry))
            .map(|entry| entry.latest)
    }

    /// Oldest fresh entry no build has taken yet, marking it used
    pub fn take_unused(&self) -> Option<LatestBlockhash> {
        let mut entries = self.entries.write();
        let ttl = self.ttl;
        entries
            .iter_mut()
            .find(|entry| !entry.used && entry.fetched_at.elapsed() < ttl)
            .map(|entry| {
                entry.used = true;
                entry.latest
            })
    }

    /// Store an entry no build has used yet
    pub fn insert(&self, latest: LatestBlockhash) {
        self.store(latest, false);
    }

    /// Number of fresh entries not yet handed to a build
    pub fn unused_len(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|entry| !entry.used && self.is_fresh(entry))
            .count()
    }

    fn store(&self, latest: LatestBlockhash, used: bool) {
        let mut entries = self.entries.write();
        let ttl = self.ttl;
        entries.retain(|entry| entry.fetched_at.elapsed() < ttl);

        // a node that has not moved on returns the same blockhash again
        if let Some(existing) = entries
            .iter_mut()
            .find(|entry| entry.latest.blockhash == latest.blockhash)
        {
            existing.used |= used;
            return;
        }
        if entries.len() >= MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(CachedBlockhash {
            latest,
            fetched_at: Instant::now(),
            used,
        });
    }

    async fn fetch(
        &self,
        transport: &dyn RpcTransport,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, RpcError> {
        let latest = transport.get_latest_blockhash(commitment).await?;
        debug!(
            blockhash = %latest.blockhash,
            last_valid_block_height = latest.last_valid_block_height,
            "Fetched recent blockhash"
        );
        Ok(latest)
    }

    /// Return the newest cached blockhash or fetch a fresh one
    ///
    /// For inspection only; builds go through [`BlockhashCache::acquire`].
    pub async fn get_or_fetch(
        &self,
        transport: &dyn RpcTransport,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, RpcError> {
        if let Some(latest) = self.get() {
            return Ok(latest);
        }
        let latest = self.fetch(transport, commitment).await?;
        self.store(latest, false);
        Ok(latest)
    }

    /// Blockhash for a new transaction, never one a previous build took
    ///
    /// Concurrent callers each take a distinct unused entry; when none is
    /// left every caller fetches.
    pub async fn acquire(
        &self,
        transport: &dyn RpcTransport,
        commitment: Commitment,
    ) -> Result<LatestBlockhash, RpcError> {
        if let Some(latest) = self.take_unused() {
            return Ok(latest);
        }
        let latest = self.fetch(transport, commitment).await?;
        self.store(latest, true);
        Ok(latest)
    }

    /// Fetch a blockhash for later builds without handing it out
    pub async fn refresh(
        &self,
        transport: &dyn RpcTransport,
        commitment: Commitment,
    ) -> Result<(), RpcError> {
        let latest = self.fetch(transport, commitment).await?;
        self.store(latest, false);
        Ok(())
    }

    /// Drop every cached value, e.g. after the node reported one unknown
    pub fn invalidate(&self) {
        self.entries.write().clear();
    }
}
