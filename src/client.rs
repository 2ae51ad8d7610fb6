//! High-level client
//!
//! [`TransactionClient`] wires the pieces together: it takes an unused
//! recent blockhash (fetching one when the cache has none), compiles and
//! signs the message, submits the wire bytes and waits for the configured
//! commitment. After each send the cache is topped up for the next build.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::blockhash_cache::BlockhashCache;
use crate::config::{ClientConfig, ConfigError};
use crate::confirm::{
    BlockHeightExpiry, ConfirmError, ConfirmParams, ConfirmRequest, ConfirmationCoordinator,
    ConfirmedTransaction, ExpiryPredicate, NeverExpires,
};
use crate::errors::TransactionError;
use crate::instruction::Instruction;
use crate::message::Message;
use crate::metrics::{Metrics, Timer};
use crate::rpc::{HttpTransport, LatestBlockhash, PubsubClient, RpcError, RpcTransport, SendOptions};
use crate::signer::Signer;
use crate::transaction::Transaction;
use crate::types::{Pubkey, Signature};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Confirm(#[from] ConfirmError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Metrics setup failed: {0}")]
    Metrics(String),
}

/// Build, sign, send and confirm against one node
#[derive(Debug)]
pub struct TransactionClient {
    config: ClientConfig,
    coordinator: Arc<ConfirmationCoordinator>,
    blockhash_cache: Option<BlockhashCache>,
    metrics: Arc<Metrics>,
}

impl TransactionClient {
    pub fn new(transport: Arc<dyn RpcTransport>, config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let metrics = Arc::new(Metrics::new().map_err(|e| ClientError::Metrics(e.to_string()))?);
        let coordinator = ConfirmationCoordinator::new(transport)
            .with_params(ConfirmParams::from(&config.confirmation))
            .with_retry_policy(config.retry.clone())
            .with_metrics(Arc::clone(&metrics));
        let blockhash_cache = config
            .blockhash_cache
            .enabled
            .then(|| BlockhashCache::new(Duration::from_millis(config.blockhash_cache.ttl_ms)));

        Ok(Self {
            config,
            coordinator: Arc::new(coordinator),
            blockhash_cache,
            metrics,
        })
    }

    /// Client talking JSON-RPC over HTTP to `config.rpc.url`
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::with_timeout(
            config.rpc.url.clone(),
            Duration::from_millis(config.rpc.timeout_ms),
        )?;
        Self::new(Arc::new(transport), config)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ConfirmationCoordinator> {
        &self.coordinator
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Recent blockhash, served from the cache when enabled
    pub async fn latest_blockhash(&self) -> Result<LatestBlockhash, ClientError> {
        let transport = self.coordinator.transport().as_ref();
        let commitment = self.config.rpc.commitment;
        let latest = match &self.blockhash_cache {
            Some(cache) => cache.get_or_fetch(transport, commitment).await?,
            None => transport.get_latest_blockhash(commitment).await?,
        };
        Ok(latest)
    }

    /// Compile and sign against a recent blockhash no earlier build has used
    pub async fn build_transaction(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&dyn Signer],
    ) -> Result<Transaction, ClientError> {
        let (transaction, _) = self.build_with_blockhash(instructions, payer, signers).await?;
        Ok(transaction)
    }

    /// Build, sign, submit and wait for the configured commitment
    pub async fn send_and_confirm(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&dyn Signer],
        opts: &SendOptions,
    ) -> Result<Signature, ClientError> {
        let (transaction, latest) = self.build_with_blockhash(instructions, payer, signers).await?;
        let wire = transaction.serialize()?;
        let expiry = BlockHeightExpiry::new(latest.last_valid_block_height)
            .with_commitment(self.config.rpc.commitment);

        let result = self.send_raw_and_confirm(&wire, &expiry, opts).await;
        self.refresh_blockhash().await;
        Ok(result?.signature)
    }

    /// Submit already signed wire bytes and wait for the configured commitment
    pub async fn send_raw_and_confirm(
        &self,
        wire: &[u8],
        expiry: &dyn ExpiryPredicate,
        opts: &SendOptions,
    ) -> Result<ConfirmedTransaction, ClientError> {
        let cancel = CancellationToken::new();
        let result = self
            .coordinator
            .submit_and_confirm(wire, opts, self.coordinator.default_params(), expiry, &cancel)
            .await;

        let stale_blockhash = match &result {
            Err(ConfirmError::Expired { .. }) => true,
            Err(ConfirmError::Failed { reason, .. }) => reason == &RpcError::BlockhashNotFound.to_string(),
            _ => false,
        };
        if stale_blockhash {
            if let Some(cache) = &self.blockhash_cache {
                debug!("Dropping cached blockhash");
                cache.invalidate();
            }
        }
        Ok(result?)
    }

    /// Submit a batch; results are in input order
    pub async fn send_batch(
        &self,
        requests: Vec<ConfirmRequest>,
        opts: &SendOptions,
    ) -> Vec<Result<ConfirmedTransaction, ConfirmError>> {
        let cancel = CancellationToken::new();
        self.coordinator
            .confirm_many(
                requests,
                opts,
                self.coordinator.default_params(),
                self.config.confirmation.concurrency_limit,
                &cancel,
            )
            .await
    }

    /// Re-check a transaction submitted earlier
    pub async fn confirm_signature(&self, signature: Signature) -> Result<ConfirmedTransaction, ClientError> {
        let cancel = CancellationToken::new();
        Ok(self
            .coordinator
            .confirm(signature, self.coordinator.default_params(), &NeverExpires, &cancel)
            .await?)
    }

    /// Like [`TransactionClient::confirm_signature`] but driven by a websocket subscription
    ///
    /// Falls back to polling when the subscription cannot be established.
    pub async fn confirm_signature_with_subscription(
        &self,
        signature: Signature,
    ) -> Result<ConfirmedTransaction, ClientError> {
        let params = self.coordinator.default_params();
        let cancel = CancellationToken::new();
        let pubsub = PubsubClient::new(self.config.rpc.websocket_url());

        match pubsub.signature_subscribe(&signature, params.commitment).await {
            Ok(subscription) => Ok(self
                .coordinator
                .confirm_with_subscription(
                    signature,
                    subscription.into_stream(),
                    params,
                    &NeverExpires,
                    &cancel,
                )
                .await?),
            Err(e) => {
                warn!(error = %e, "Subscription unavailable, polling instead");
                Ok(self
                    .coordinator
                    .confirm(signature, params, &NeverExpires, &cancel)
                    .await?)
            }
        }
    }

    /// Blockhash for a new build; never one an earlier build already signed against
    async fn acquire_blockhash(&self) -> Result<LatestBlockhash, ClientError> {
        let transport = self.coordinator.transport().as_ref();
        let commitment = self.config.rpc.commitment;
        let latest = match &self.blockhash_cache {
            Some(cache) => cache.acquire(transport, commitment).await?,
            None => transport.get_latest_blockhash(commitment).await?,
        };
        Ok(latest)
    }

    /// Top the cache up after a send; failures only cost the next build a fetch
    async fn refresh_blockhash(&self) {
        let Some(cache) = &self.blockhash_cache else {
            return;
        };
        let transport = self.coordinator.transport().as_ref();
        if let Err(e) = cache.refresh(transport, self.config.rpc.commitment).await {
            debug!(error = %e, "Blockhash refresh failed");
        }
    }

    async fn build_with_blockhash(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&dyn Signer],
    ) -> Result<(Transaction, LatestBlockhash), ClientError> {
        let latest = self.acquire_blockhash().await?;
        let timer = Timer::start();
        let message = Message::new_with_blockhash(instructions, payer, &latest.blockhash)?;
        let transaction = Transaction::new_signed(message, signers)?;
        timer.observe_duration(&self.metrics.build_latency);
        debug!(
            blockhash = %latest.blockhash,
            signers = signers.len(),
            "Transaction built"
        );
        Ok((transaction, latest))
    }
}
