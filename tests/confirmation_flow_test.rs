//! Confirmation coordinator behaviour against a scripted node
//!
//! All tests run on paused time, so multi-second waits finish instantly.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use soltx::confirm::{ConfirmRequest, ConfirmedTransaction, StatusTracker};
use soltx::metrics::Metrics;
use soltx::rpc::RetryPolicy;
use soltx::test_utils::ScriptedTransport;
use soltx::{
    AccountMeta, BlockHeightExpiry, Commitment, ConfirmError, ConfirmParams, ConfirmationCoordinator,
    ConfirmationStatus, ExpiryOnBlockhashNotFound, Hash, Instruction, Keypair, Message, NeverExpires,
    Pubkey, RpcError, RpcTransport, SendOptions, Signature, SignatureStatus, Signer, Transaction,
};
use tokio_util::sync::CancellationToken;

fn signed_wire(seed: u8) -> (Signature, Vec<u8>) {
    let payer = Keypair::from_seed(&[seed; 32]);
    let ix = Instruction::new_with_bytes(
        Pubkey::new_from_array([0xee; 32]),
        &[seed],
        vec![AccountMeta::new(Pubkey::new_from_array([seed.wrapping_add(1); 32]), false)],
    );
    let message = Message::new_with_blockhash(&[ix], &payer.pubkey(), &Hash::new_from_array([3; 32])).unwrap();
    let tx = Transaction::new_signed(message, &[&payer]).unwrap();
    (tx.signatures[0], tx.serialize().unwrap())
}

fn params() -> ConfirmParams {
    ConfirmParams {
        commitment: Commitment::Confirmed,
        timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(500),
        max_polls: None,
        max_transient_retries: 3,
    }
}

fn coordinator(transport: &Arc<ScriptedTransport>) -> ConfirmationCoordinator {
    let transport: Arc<dyn RpcTransport> = transport.clone();
    ConfirmationCoordinator::new(transport).with_retry_policy(RetryPolicy::default())
}

fn status(commitment: Commitment, slot: u64) -> Result<Option<SignatureStatus>, RpcError> {
    Ok(Some(ScriptedTransport::status(commitment, slot)))
}

fn timeout_error() -> RpcError {
    RpcError::Timeout {
        endpoint: "scripted".to_string(),
        timeout_ms: 1000,
    }
}

#[tokio::test(start_paused = true)]
async fn test_processed_then_unknown_then_confirmed() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(1);
    transport.push_status_for(sig, status(Commitment::Processed, 10));
    transport.push_status_for(sig, Ok(None));
    transport.push_status_for(sig, status(Commitment::Confirmed, 12));

    let done = coordinator(&transport)
        .submit_and_confirm(&wire, &SendOptions::default(), &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.signature, sig);
    assert_eq!(done.status, ConfirmationStatus::Confirmed);
    assert_eq!(done.slot, Some(12));
    assert_eq!(done.polls, 3);
    assert_eq!(transport.sent_transactions(), vec![wire]);
}

#[tokio::test(start_paused = true)]
async fn test_published_status_never_regresses() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(2);
    transport.push_status_for(sig, status(Commitment::Confirmed, 20));
    transport.push_status_for(sig, status(Commitment::Processed, 19));
    transport.push_status_for(sig, Ok(None));
    transport.push_status_for(sig, status(Commitment::Finalized, 40));

    let (tracker, mut rx) = StatusTracker::new(Commitment::Finalized);
    let observer = tokio::spawn(async move {
        let mut seen = vec![rx.borrow().clone()];
        while rx.changed().await.is_ok() {
            seen.push(rx.borrow_and_update().clone());
        }
        seen
    });

    let target = params().with_commitment(Commitment::Finalized);
    let done = coordinator(&transport)
        .confirm_tracked(sig, &target, &NeverExpires, &CancellationToken::new(), tracker)
        .await
        .unwrap();
    assert_eq!(done.status, ConfirmationStatus::Finalized);

    let seen = observer.await.unwrap();
    let ranks: Vec<_> = seen.iter().map(|s| s.commitment()).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]), "regressed: {:?}", seen);
    assert_eq!(seen.last(), Some(&ConfirmationStatus::Finalized));
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_exhaust_into_timeout() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(3);
    transport.push_status_for(sig, Err(timeout_error()));

    let err = coordinator(&transport)
        .confirm(sig, &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ConfirmError::TimedOut {
            signature: sig,
            last_status: ConfirmationStatus::Pending,
        }
    );
    assert_eq!(transport.status_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_reset_after_success() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(4);
    for _ in 0..3 {
        transport.push_status_for(sig, Err(timeout_error()));
    }
    transport.push_status_for(sig, Ok(None));
    for _ in 0..3 {
        transport.push_status_for(sig, Err(timeout_error()));
    }
    transport.push_status_for(sig, status(Commitment::Confirmed, 7));

    let done = coordinator(&transport)
        .confirm(sig, &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.status, ConfirmationStatus::Confirmed);
    assert_eq!(done.polls, 8);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_poll_error_is_terminal() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(5);
    transport.push_status_for(sig, Err(RpcError::InvalidResponse("garbage".to_string())));

    let err = coordinator(&transport)
        .confirm(sig, &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmError::Rpc { signature, .. } if signature == sig));
    assert_eq!(transport.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expires_when_never_observed() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(6);
    transport.push_block_height(Ok(100));
    transport.push_block_height(Ok(101));

    let err = coordinator(&transport)
        .confirm(sig, &params(), &BlockHeightExpiry::new(100), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, ConfirmError::Expired { signature: sig });
    assert_eq!(transport.block_height_calls(), 2);
    assert_eq!(transport.status_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_observed_transaction_ignores_expiry() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(7);
    transport.push_block_height(Ok(10_000));
    transport.push_status_for(sig, status(Commitment::Processed, 1));
    transport.push_status_for(sig, Ok(None));
    transport.push_status_for(sig, status(Commitment::Confirmed, 2));

    let done = coordinator(&transport)
        .confirm(sig, &params(), &BlockHeightExpiry::new(100), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.status, ConfirmationStatus::Confirmed);
    assert_eq!(transport.block_height_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_execution_error_fails_without_retry() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(8);
    transport.push_status_for(
        sig,
        Ok(Some(ScriptedTransport::failed_status(r#"{"InstructionError":[0,{"Custom":1}]}"#, 3))),
    );

    let err = coordinator(&transport)
        .submit_and_confirm(&wire, &SendOptions::default(), &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ConfirmError::Failed {
            signature: sig,
            reason: r#"{"InstructionError":[0,{"Custom":1}]}"#.to_string(),
        }
    );
    assert_eq!(transport.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_times_out() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(9);
    let short = params().with_timeout(Duration::from_secs(5));

    let err = coordinator(&transport)
        .confirm(sig, &short, &NeverExpires, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmError::TimedOut { .. }));
    let polls = transport.status_calls();
    assert!((10..=11).contains(&polls), "polled {} times", polls);
}

#[tokio::test(start_paused = true)]
async fn test_poll_budget() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(10);
    let capped = ConfirmParams {
        max_polls: Some(3),
        ..params()
    };

    let err = coordinator(&transport)
        .confirm(sig, &capped, &NeverExpires, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmError::TimedOut { .. }));
    assert_eq!(transport.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_spawned_confirmation() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(11);
    let coordinator = Arc::new(coordinator(&transport));

    let pending = coordinator
        .spawn(wire, SendOptions::default(), params(), Arc::new(NeverExpires))
        .unwrap();
    assert_eq!(pending.signature(), sig);

    let published = pending.subscribe();
    tokio::time::sleep(Duration::from_secs(2)).await;
    pending.cancel();
    let err = pending.wait().await.unwrap_err();
    assert_eq!(err, ConfirmError::Cancelled { signature: sig });
    assert_eq!(transport.send_calls(), 1);
    assert_eq!(*published.borrow(), ConfirmationStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_rpc_error_resolves_published_status() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(18);
    transport.push_status_for(sig, Err(RpcError::InvalidResponse("garbage".to_string())));
    let coordinator = Arc::new(coordinator(&transport));

    let pending = coordinator
        .spawn(wire, SendOptions::default(), params(), Arc::new(NeverExpires))
        .unwrap();
    let published = pending.subscribe();
    let err = pending.wait().await.unwrap_err();

    assert!(matches!(err, ConfirmError::Rpc { signature, .. } if signature == sig));
    let status = published.borrow().clone();
    assert!(status.is_terminal(), "still {:?}", status);
    assert!(matches!(status, ConfirmationStatus::Abandoned(reason) if reason.contains("garbage")));
}

#[tokio::test(start_paused = true)]
async fn test_spawned_submission_failure_resolves_published_status() {
    let transport = Arc::new(ScriptedTransport::new());
    let (_, wire) = signed_wire(19);
    transport.push_send(Err(timeout_error()));
    let coordinator = Arc::new(coordinator(&transport));

    let pending = coordinator
        .spawn(wire, SendOptions::default(), params(), Arc::new(NeverExpires))
        .unwrap();
    let published = pending.subscribe();
    let err = pending.wait().await.unwrap_err();

    assert!(matches!(err, ConfirmError::Submission { .. }));
    assert!(matches!(*published.borrow(), ConfirmationStatus::Abandoned(_)));
    assert_eq!(transport.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_confirmation_publishes_progress() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(12);
    transport.push_status_for(sig, Ok(None));
    transport.push_status_for(sig, status(Commitment::Confirmed, 5));
    let coordinator = Arc::new(coordinator(&transport));

    let pending = coordinator
        .spawn(wire, SendOptions::default(), params(), Arc::new(NeverExpires))
        .unwrap();
    let mut updates = pending.subscribe();
    updates
        .wait_for(|s| *s == ConfirmationStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(pending.status(), ConfirmationStatus::Confirmed);
    assert!(pending.wait().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_spawn_rejects_unsigned_bytes() {
    let transport = Arc::new(ScriptedTransport::new());
    let coordinator = Arc::new(coordinator(&transport));
    let err = coordinator
        .spawn(vec![1, 2, 3], SendOptions::default(), params(), Arc::new(NeverExpires))
        .unwrap_err();
    assert!(matches!(err, ConfirmError::InvalidTransaction(_)));
    assert_eq!(transport.send_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_submission_fails() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(13);
    transport.push_send(Err(RpcError::TransactionRejected {
        message: "Transaction simulation failed: insufficient funds".to_string(),
    }));

    let err = coordinator(&transport)
        .submit_and_confirm(&wire, &SendOptions::default(), &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmError::Failed { signature, .. } if signature == sig));
    assert_eq!(transport.send_calls(), 1);
    assert_eq!(transport.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_blockhash_at_submission_can_mean_expiry() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(14);
    transport.push_send(Err(RpcError::BlockhashNotFound));

    let err = coordinator(&transport)
        .submit_and_confirm(
            &wire,
            &SendOptions::default(),
            &params(),
            &ExpiryOnBlockhashNotFound,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ConfirmError::Expired { signature: sig });
}

#[tokio::test(start_paused = true)]
async fn test_transient_submission_errors_are_retried() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(15);
    transport.push_send(Err(timeout_error()));
    transport.push_send(Ok(()));

    let submitted = coordinator(&transport)
        .submit(&wire, &SendOptions::default())
        .await
        .unwrap();
    assert_eq!(submitted, sig);
    assert_eq!(transport.send_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_submission_retries_exhausted() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, wire) = signed_wire(16);
    transport.push_send(Err(timeout_error()));

    let err = coordinator(&transport)
        .submit(&wire, &SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ConfirmError::Submission { signature, .. } if signature == sig));
    assert!(err.is_retryable());
    assert_eq!(transport.send_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_skip_confirmation_returns_after_submit() {
    let transport = Arc::new(ScriptedTransport::new());
    let (_, wire) = signed_wire(17);
    let opts = SendOptions {
        skip_confirmation: true,
        ..SendOptions::default()
    };

    let done = coordinator(&transport)
        .submit_and_confirm(&wire, &opts, &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.status, ConfirmationStatus::Pending);
    assert_eq!(transport.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_confirm_many_keeps_input_order() {
    let transport = Arc::new(ScriptedTransport::new());
    let (slow, slow_wire) = signed_wire(20);
    let (fast, fast_wire) = signed_wire(21);
    let (bad, bad_wire) = signed_wire(22);
    for _ in 0..4 {
        transport.push_status_for(slow, Ok(None));
    }
    transport.push_status_for(slow, status(Commitment::Confirmed, 50));
    transport.push_status_for(fast, status(Commitment::Finalized, 10));
    transport.push_status_for(bad, Ok(Some(ScriptedTransport::failed_status("AccountInUse", 11))));

    let requests = vec![
        ConfirmRequest::new(slow_wire, Arc::new(NeverExpires)),
        ConfirmRequest::new(fast_wire, Arc::new(NeverExpires)),
        ConfirmRequest::new(bad_wire, Arc::new(NeverExpires)),
    ];
    let results = coordinator(&transport)
        .confirm_many(requests, &SendOptions::default(), &params(), 2, &CancellationToken::new())
        .await;

    assert_eq!(results.len(), 3);
    let ids: Vec<Option<Signature>> = results
        .iter()
        .map(|r| match r {
            Ok(ConfirmedTransaction { signature, .. }) => Some(*signature),
            Err(e) => e.signature().copied(),
        })
        .collect();
    assert_eq!(ids, vec![Some(slow), Some(fast), Some(bad)]);
    assert_eq!(results[0].as_ref().map(|d| d.polls), Ok(5));
    assert!(matches!(results[2], Err(ConfirmError::Failed { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_subscription_drives_confirmation() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(30);
    let updates = stream::iter(vec![
        Ok(ScriptedTransport::status(Commitment::Processed, 1)),
        Ok(ScriptedTransport::status(Commitment::Confirmed, 2)),
    ])
    .chain(stream::pending());

    let done = coordinator(&transport)
        .confirm_with_subscription(sig, updates, &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.status, ConfirmationStatus::Confirmed);
    assert_eq!(transport.status_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_failure_falls_back_to_polling() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(31);
    transport.push_status_for(sig, status(Commitment::Confirmed, 9));
    let updates = stream::iter(vec![Err(RpcError::SubscriptionClosed("socket closed".to_string()))]);

    let done = coordinator(&transport)
        .confirm_with_subscription(sig, updates, &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.status, ConfirmationStatus::Confirmed);
    assert_eq!(transport.status_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_checks_expiry_while_unseen() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(32);
    transport.push_block_height(Ok(5));
    transport.push_block_height(Ok(6));

    let err = coordinator(&transport)
        .confirm_with_subscription(
            sig,
            stream::pending::<Result<SignatureStatus, RpcError>>(),
            &params(),
            &BlockHeightExpiry::new(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ConfirmError::Expired { signature: sig });
}

#[tokio::test(start_paused = true)]
async fn test_subscription_expiry_checks_tolerate_scattered_errors() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(33);
    let rate_limited = || RpcError::RateLimited {
        endpoint: "scripted".to_string(),
    };
    // more errors in total than the budget, never more than one in a row
    for _ in 0..6 {
        transport.push_block_height(Err(rate_limited()));
        transport.push_block_height(Ok(1));
    }
    transport.push_block_height(Ok(101));

    let err = coordinator(&transport)
        .confirm_with_subscription(
            sig,
            stream::pending::<Result<SignatureStatus, RpcError>>(),
            &params(),
            &BlockHeightExpiry::new(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, ConfirmError::Expired { signature: sig });
    assert_eq!(transport.block_height_calls(), 13);
}

#[tokio::test(start_paused = true)]
async fn test_subscription_expiry_check_backs_off_after_error() {
    let transport = Arc::new(ScriptedTransport::new());
    let (sig, _) = signed_wire(34);
    transport.push_block_height(Err(RpcError::RateLimited {
        endpoint: "scripted".to_string(),
    }));
    transport.push_block_height(Ok(101));
    let slow_retry = RetryPolicy {
        base_delay_ms: 4_000,
        jitter_factor: 0.0,
        ..RetryPolicy::default()
    };
    let shared: Arc<dyn RpcTransport> = transport.clone();
    let coordinator = ConfirmationCoordinator::new(shared).with_retry_policy(slow_retry);

    let started = tokio::time::Instant::now();
    let err = coordinator
        .confirm_with_subscription(
            sig,
            stream::pending::<Result<SignatureStatus, RpcError>>(),
            &params(),
            &BlockHeightExpiry::new(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, ConfirmError::Expired { signature: sig });
    assert_eq!(transport.block_height_calls(), 2);
    // second check waits out the backoff rather than the 500ms poll interval
    assert!(started.elapsed() >= Duration::from_secs(4), "checked after {:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_are_counted() {
    let transport = Arc::new(ScriptedTransport::new());
    let metrics = Arc::new(Metrics::new().unwrap());
    let (sig, wire) = signed_wire(40);
    transport.push_status_for(sig, status(Commitment::Confirmed, 1));

    let coordinator = coordinator(&transport).with_metrics(Arc::clone(&metrics));
    coordinator
        .submit_and_confirm(&wire, &SendOptions::default(), &params(), &NeverExpires, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(metrics.submissions_total.get(), 1);
    assert_eq!(metrics.outcomes.with_label_values(&["confirmed"]).get(), 1);
    assert_eq!(metrics.in_flight.get(), 0);
    assert_eq!(metrics.confirmation_latency.get_sample_count(), 1);
}
