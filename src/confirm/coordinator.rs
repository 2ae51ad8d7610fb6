//! Submission and confirmation drivers
//!
//! One [`ConfirmationCoordinator`] is shared by every in-flight
//! transaction talking to the same node. Each wait owns its own
//! [`StatusTracker`], deadline and cancellation token; the coordinator
//! itself holds no per-transaction state.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::expiry::ExpiryPredicate;
use super::retry::retry_with_backoff;
use super::tracker::{Observation, StatusTracker};
use super::{ConfirmError, ConfirmParams, ConfirmationStatus};
use crate::errors::TransactionError;
use crate::metrics::{Metrics, Timer};
use crate::observability::{transaction_span, CorrelationId};
use crate::rpc::{RetryPolicy, RpcError, RpcTransport, SendOptions, SignatureStatus};
use crate::transaction::Transaction;
use crate::types::Signature;

/// Stand-in deadline for timeouts too large to add to `Instant::now()`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A wait that ended at (or past) its target commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedTransaction {
    pub signature: Signature,
    /// `Pending` when confirmation was skipped
    pub status: ConfirmationStatus,
    /// Slot of the last forward observation
    pub slot: Option<u64>,
    pub polls: u32,
    pub elapsed: Duration,
}

/// One entry of a [`ConfirmationCoordinator::confirm_many`] batch
#[derive(Clone)]
pub struct ConfirmRequest {
    pub wire: Vec<u8>,
    pub expiry: Arc<dyn ExpiryPredicate>,
}

impl ConfirmRequest {
    pub fn new(wire: Vec<u8>, expiry: Arc<dyn ExpiryPredicate>) -> Self {
        Self { wire, expiry }
    }

    pub fn from_transaction(
        transaction: &Transaction,
        expiry: Arc<dyn ExpiryPredicate>,
    ) -> Result<Self, TransactionError> {
        Ok(Self::new(transaction.serialize()?, expiry))
    }
}

impl std::fmt::Debug for ConfirmRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmRequest")
            .field("wire_len", &self.wire.len())
            .finish_non_exhaustive()
    }
}

/// Handle to a confirmation running on its own task
///
/// Dropping the handle without calling [`PendingConfirmation::wait`] stops
/// tracking. The transaction itself stays broadcast.
#[derive(Debug)]
pub struct PendingConfirmation {
    signature: Signature,
    status: watch::Receiver<ConfirmationStatus>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<ConfirmedTransaction, ConfirmError>>>,
}

impl PendingConfirmation {
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Latest published status
    pub fn status(&self) -> ConfirmationStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status transition
    pub fn subscribe(&self) -> watch::Receiver<ConfirmationStatus> {
        self.status.clone()
    }

    /// Stop waiting; [`PendingConfirmation::wait`] then yields `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(mut self) -> Result<ConfirmedTransaction, ConfirmError> {
        let signature = self.signature;
        let Some(handle) = self.handle.take() else {
            return Err(ConfirmError::TaskAborted {
                signature,
                reason: "already awaited".to_string(),
            });
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(ConfirmError::TaskAborted {
                signature,
                reason: e.to_string(),
            }),
        }
    }
}

impl Drop for PendingConfirmation {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Per-wait state threaded through the drivers
struct Wait<'a> {
    signature: Signature,
    params: &'a ConfirmParams,
    expiry: &'a dyn ExpiryPredicate,
    cancel: &'a CancellationToken,
    tracker: StatusTracker,
    started: Instant,
    deadline: Instant,
    polls: u32,
    consecutive_errors: u32,
}

impl<'a> Wait<'a> {
    fn new(
        signature: Signature,
        params: &'a ConfirmParams,
        expiry: &'a dyn ExpiryPredicate,
        cancel: &'a CancellationToken,
        tracker: StatusTracker,
    ) -> Self {
        let started = Instant::now();
        let deadline = started
            .checked_add(params.timeout)
            .unwrap_or(started + FAR_FUTURE);
        Self {
            signature,
            params,
            expiry,
            cancel,
            tracker,
            started,
            deadline,
            polls: 0,
            consecutive_errors: 0,
        }
    }

    fn confirmed(&self) -> ConfirmedTransaction {
        ConfirmedTransaction {
            signature: self.signature,
            status: self.tracker.current().clone(),
            slot: self.tracker.slot(),
            polls: self.polls,
            elapsed: self.started.elapsed(),
        }
    }

    fn failed(&self, reason: String) -> ConfirmError {
        ConfirmError::Failed {
            signature: self.signature,
            reason,
        }
    }

    fn cancelled(&self) -> ConfirmError {
        ConfirmError::Cancelled {
            signature: self.signature,
        }
    }

    fn timed_out(&mut self) -> ConfirmError {
        let last_status = self.tracker.current().clone();
        self.tracker.finish(ConfirmationStatus::TimedOut);
        ConfirmError::TimedOut {
            signature: self.signature,
            last_status,
        }
    }

    fn expired(&mut self) -> ConfirmError {
        self.tracker.finish(ConfirmationStatus::Expired);
        ConfirmError::Expired {
            signature: self.signature,
        }
    }

    /// Publish the terminal status matching an error; observers never see a wait hang
    fn settle(
        &mut self,
        result: Result<ConfirmedTransaction, ConfirmError>,
    ) -> Result<ConfirmedTransaction, ConfirmError> {
        if let Err(e) = &result {
            self.tracker.finish(e.terminal_status());
        }
        result
    }
}

/// Drives submitted transactions to their target commitment
pub struct ConfirmationCoordinator {
    transport: Arc<dyn RpcTransport>,
    defaults: ConfirmParams,
    retry: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ConfirmationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationCoordinator")
            .field("defaults", &self.defaults)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ConfirmationCoordinator {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            defaults: ConfirmParams::default(),
            retry: RetryPolicy::default(),
            metrics: None,
        }
    }

    pub fn with_params(mut self, defaults: ConfirmParams) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parameters used when a caller has none of its own
    pub fn default_params(&self) -> &ConfirmParams {
        &self.defaults
    }

    pub fn transport(&self) -> &Arc<dyn RpcTransport> {
        &self.transport
    }

    /// Hand a signed wire payload to the node, retrying transient failures
    pub async fn submit(&self, wire: &[u8], opts: &SendOptions) -> Result<Signature, ConfirmError> {
        let signature = Transaction::signature_from_wire(wire)?;
        self.send_with_retry(signature, wire, opts)
            .await
            .map_err(|e| submission_error(signature, e, None))?;
        Ok(signature)
    }

    /// Poll an already submitted transaction until it settles
    pub async fn confirm(
        &self,
        signature: Signature,
        params: &ConfirmParams,
        expiry: &dyn ExpiryPredicate,
        cancel: &CancellationToken,
    ) -> Result<ConfirmedTransaction, ConfirmError> {
        let (tracker, _status) = StatusTracker::new(params.commitment);
        self.confirm_tracked(signature, params, expiry, cancel, tracker)
            .await
    }

    /// [`ConfirmationCoordinator::confirm`] publishing through a caller-owned tracker
    pub async fn confirm_tracked(
        &self,
        signature: Signature,
        params: &ConfirmParams,
        expiry: &dyn ExpiryPredicate,
        cancel: &CancellationToken,
        tracker: StatusTracker,
    ) -> Result<ConfirmedTransaction, ConfirmError> {
        let correlation_id = CorrelationId::new();
        let span = transaction_span("confirm", &signature, &correlation_id);
        async move {
            let _in_flight = self.metrics.as_ref().map(|m| m.track_in_flight());
            let mut wait = Wait::new(signature, params, expiry, cancel, tracker);
            let result = self.poll_until_settled(&mut wait).await;
            self.record(wait.settle(result))
        }
        .instrument(span)
        .await
    }

    /// Follow push notifications, falling back to polling when they stop
    ///
    /// `updates` is typically [`crate::rpc::SignatureSubscription::into_stream`].
    /// Expiry is still checked every `poll_interval` until the transaction is seen.
    pub async fn confirm_with_subscription<S>(
        &self,
        signature: Signature,
        updates: S,
        params: &ConfirmParams,
        expiry: &dyn ExpiryPredicate,
        cancel: &CancellationToken,
    ) -> Result<ConfirmedTransaction, ConfirmError>
    where
        S: Stream<Item = Result<SignatureStatus, RpcError>> + Send,
    {
        let correlation_id = CorrelationId::new();
        let span = transaction_span("confirm_with_subscription", &signature, &correlation_id);
        async move {
            let _in_flight = self.metrics.as_ref().map(|m| m.track_in_flight());
            let (tracker, _status) = StatusTracker::new(params.commitment);
            let mut wait = Wait::new(signature, params, expiry, cancel, tracker);
            let result = self.follow_updates(&mut wait, updates).await;
            self.record(wait.settle(result))
        }
        .instrument(span)
        .await
    }

    /// Submit then confirm; honours `opts.skip_confirmation`
    pub async fn submit_and_confirm(
        &self,
        wire: &[u8],
        opts: &SendOptions,
        params: &ConfirmParams,
        expiry: &dyn ExpiryPredicate,
        cancel: &CancellationToken,
    ) -> Result<ConfirmedTransaction, ConfirmError> {
        let signature = Transaction::signature_from_wire(wire)?;
        let (tracker, _status) = StatusTracker::new(params.commitment);
        self.run(signature, wire, opts, params, expiry, cancel, tracker)
            .await
    }

    /// Submit and confirm on a dedicated task
    pub fn spawn(
        self: &Arc<Self>,
        wire: Vec<u8>,
        opts: SendOptions,
        params: ConfirmParams,
        expiry: Arc<dyn ExpiryPredicate>,
    ) -> Result<PendingConfirmation, ConfirmError> {
        let signature = Transaction::signature_from_wire(&wire)?;
        let (tracker, status) = StatusTracker::new(params.commitment);
        let cancel = CancellationToken::new();

        let coordinator = Arc::clone(self);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            coordinator
                .run(
                    signature,
                    &wire,
                    &opts,
                    &params,
                    expiry.as_ref(),
                    &task_cancel,
                    tracker,
                )
                .await
        });

        Ok(PendingConfirmation {
            signature,
            status,
            cancel,
            handle: Some(handle),
        })
    }

    /// Submit and confirm a batch with at most `concurrency_limit` in flight
    ///
    /// Results come back in input order regardless of completion order.
    pub async fn confirm_many(
        &self,
        requests: Vec<ConfirmRequest>,
        opts: &SendOptions,
        params: &ConfirmParams,
        concurrency_limit: usize,
        cancel: &CancellationToken,
    ) -> Vec<Result<ConfirmedTransaction, ConfirmError>> {
        let limit = concurrency_limit.max(1);
        debug!(count = requests.len(), limit, "Confirming batch");

        let mut results: Vec<_> = stream::iter(requests.into_iter().enumerate())
            .map(|(index, request)| async move {
                let result = self
                    .submit_and_confirm(&request.wire, opts, params, request.expiry.as_ref(), cancel)
                    .await;
                (index, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        signature: Signature,
        wire: &[u8],
        opts: &SendOptions,
        params: &ConfirmParams,
        expiry: &dyn ExpiryPredicate,
        cancel: &CancellationToken,
        tracker: StatusTracker,
    ) -> Result<ConfirmedTransaction, ConfirmError> {
        let correlation_id = CorrelationId::new();
        let span = transaction_span("send_and_confirm", &signature, &correlation_id);
        async move {
            let _in_flight = self.metrics.as_ref().map(|m| m.track_in_flight());
            let mut wait = Wait::new(signature, params, expiry, cancel, tracker);

            let submitted = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(wait.cancelled()),
                sent = self.send_with_retry(signature, wire, opts) => {
                    sent.map_err(|e| submission_error(signature, e, Some(expiry)))
                }
            };

            let result = match submitted {
                Err(e) => Err(e),
                Ok(()) if opts.skip_confirmation => {
                    debug!("Skipping confirmation");
                    Ok(wait.confirmed())
                }
                Ok(()) => self.poll_until_settled(&mut wait).await,
            };
            self.record(wait.settle(result))
        }
        .instrument(span)
        .await
    }

    async fn send_with_retry(
        &self,
        signature: Signature,
        wire: &[u8],
        opts: &SendOptions,
    ) -> Result<(), RpcError> {
        if let Some(metrics) = &self.metrics {
            metrics.submissions_total.inc();
        }
        let timer = Timer::start();
        let transport = &self.transport;
        let outcome = retry_with_backoff("send_transaction", &self.retry, move || {
            transport.send_transaction(wire, opts)
        })
        .await;

        if let Some(metrics) = &self.metrics {
            timer.observe_duration(&metrics.rpc_latency);
            metrics
                .submission_retries
                .inc_by(u64::from(outcome.attempts.saturating_sub(1)));
            if outcome.result.is_err() {
                metrics.submission_failures.inc();
            }
        }

        let returned = outcome.result?;
        if returned != signature {
            warn!(returned = %returned, "Node reported a different transaction id");
        }
        info!(attempts = outcome.attempts, "Transaction submitted");
        Ok(())
    }

    async fn poll_until_settled(&self, wait: &mut Wait<'_>) -> Result<ConfirmedTransaction, ConfirmError> {
        let lookup = [wait.signature];
        let cancel = wait.cancel;
        let deadline = wait.deadline;

        loop {
            if wait.params.max_polls.is_some_and(|max| wait.polls >= max) {
                debug!(polls = wait.polls, "Poll budget exhausted");
                return Err(wait.timed_out());
            }
            wait.polls += 1;
            if let Some(metrics) = &self.metrics {
                metrics.status_polls.inc();
            }

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(wait.cancelled()),
                _ = sleep_until(deadline) => return Err(wait.timed_out()),
                polled = self.transport.get_signature_statuses(&lookup) => polled,
            };

            let mut delay = wait.params.poll_interval;
            match polled {
                Ok(statuses) => {
                    wait.consecutive_errors = 0;
                    let status = statuses.into_iter().next().flatten();
                    if let Some(done) = self.apply(wait, status.as_ref()) {
                        return done;
                    }
                    if !wait.tracker.observed() {
                        if let Some(backoff) = self.check_expiry(wait).await? {
                            delay = backoff;
                        }
                    }
                }
                Err(e) => delay = self.on_rpc_error(wait, e)?,
            }

            let wake = (Instant::now() + delay).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(wait.cancelled()),
                _ = sleep_until(wake) => {}
            }
            if Instant::now() >= deadline {
                return Err(wait.timed_out());
            }
        }
    }

    async fn follow_updates<S>(
        &self,
        wait: &mut Wait<'_>,
        updates: S,
    ) -> Result<ConfirmedTransaction, ConfirmError>
    where
        S: Stream<Item = Result<SignatureStatus, RpcError>> + Send,
    {
        let cancel = wait.cancel;
        let deadline = wait.deadline;
        let mut updates = std::pin::pin!(updates);
        let mut expiry_tick = interval(wait.params.poll_interval);
        expiry_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        enum Event {
            Update(Option<Result<SignatureStatus, RpcError>>),
            CheckExpiry,
        }

        loop {
            let unobserved = !wait.tracker.observed();
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(wait.cancelled()),
                _ = sleep_until(deadline) => return Err(wait.timed_out()),
                update = updates.next() => Event::Update(update),
                _ = expiry_tick.tick(), if unobserved => Event::CheckExpiry,
            };

            match event {
                Event::Update(Some(Ok(status))) => {
                    if let Some(done) = self.apply(wait, Some(&status)) {
                        return done;
                    }
                }
                Event::Update(Some(Err(e))) => {
                    warn!(error = %e, "Subscription failed, falling back to polling");
                    break;
                }
                Event::Update(None) => {
                    debug!("Subscription ended, falling back to polling");
                    break;
                }
                Event::CheckExpiry => {
                    if let Some(backoff) = self.check_expiry(wait).await? {
                        expiry_tick.reset_after(backoff);
                    }
                }
            }
        }

        self.poll_until_settled(wait).await
    }

    /// Feed one observation to the tracker; `Some` once the wait is over
    fn apply(
        &self,
        wait: &mut Wait<'_>,
        status: Option<&SignatureStatus>,
    ) -> Option<Result<ConfirmedTransaction, ConfirmError>> {
        match wait.tracker.observe(status) {
            Observation::Reached(_) => Some(Ok(wait.confirmed())),
            Observation::Failed(reason) => Some(Err(wait.failed(reason))),
            Observation::Advanced(commitment) => {
                info!(commitment = %commitment, "Transaction progressed");
                None
            }
            Observation::Unchanged => None,
        }
    }

    /// Returns a backoff when the check itself hit a transient error
    ///
    /// A clean check clears the transient-error streak.
    async fn check_expiry(&self, wait: &mut Wait<'_>) -> Result<Option<Duration>, ConfirmError> {
        let cancel = wait.cancel;
        let deadline = wait.deadline;
        let expiry = wait.expiry;

        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(wait.cancelled()),
            _ = sleep_until(deadline) => return Err(wait.timed_out()),
            checked = expiry.is_expired(self.transport.as_ref()) => checked,
        };
        match checked {
            Ok(true) => {
                warn!("Blockhash expired before the transaction was observed");
                Err(wait.expired())
            }
            Ok(false) => {
                wait.consecutive_errors = 0;
                Ok(None)
            }
            Err(e) => self.on_rpc_error(wait, e).map(Some),
        }
    }

    /// Classify an RPC failure during tracking; `Ok` carries the backoff
    fn on_rpc_error(&self, wait: &mut Wait<'_>, error: RpcError) -> Result<Duration, ConfirmError> {
        if let Some(metrics) = &self.metrics {
            metrics.record_poll_error(error.category());
        }
        if !wait.tracker.observed() && wait.expiry.is_expiry_signal(&error) {
            return Err(wait.expired());
        }
        if !error.is_retryable() {
            return Err(ConfirmError::Rpc {
                signature: wait.signature,
                source: error,
            });
        }

        wait.consecutive_errors += 1;
        if wait.consecutive_errors > wait.params.max_transient_retries {
            warn!(
                errors = wait.consecutive_errors,
                error = %error,
                "Too many consecutive RPC failures"
            );
            return Err(wait.timed_out());
        }

        let step = (wait.consecutive_errors - 1).min(self.retry.max_attempts.saturating_sub(1));
        let backoff = self
            .retry
            .calculate_delay(step)
            .map_or(wait.params.poll_interval, |d| d.max(wait.params.poll_interval));
        debug!(
            errors = wait.consecutive_errors,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Transient RPC error while confirming"
        );
        Ok(backoff)
    }

    fn record(
        &self,
        result: Result<ConfirmedTransaction, ConfirmError>,
    ) -> Result<ConfirmedTransaction, ConfirmError> {
        match &result {
            Ok(done) => {
                info!(
                    status = %done.status,
                    polls = done.polls,
                    elapsed_ms = done.elapsed.as_millis() as u64,
                    "Confirmation complete"
                );
                if let Some(metrics) = &self.metrics {
                    let outcome = done
                        .status
                        .commitment()
                        .map_or("submitted", |c| c.as_str());
                    metrics.record_outcome(outcome);
                    if done.status.commitment().is_some() {
                        metrics.confirmation_latency.observe(done.elapsed.as_secs_f64());
                    }
                }
            }
            Err(e) => {
                match e {
                    ConfirmError::Cancelled { .. } => info!("Confirmation cancelled"),
                    _ => warn!(error = %e, "Confirmation ended without reaching target"),
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_outcome(e.category());
                }
            }
        }
        result
    }
}

/// Map a submission failure to its terminal error
fn submission_error(
    signature: Signature,
    error: RpcError,
    expiry: Option<&dyn ExpiryPredicate>,
) -> ConfirmError {
    if expiry.is_some_and(|p| p.is_expiry_signal(&error)) {
        return ConfirmError::Expired { signature };
    }
    match error {
        RpcError::TransactionRejected { .. } | RpcError::BlockhashNotFound => ConfirmError::Failed {
            signature,
            reason: error.to_string(),
        },
        source => ConfirmError::Submission { signature, source },
    }
}
