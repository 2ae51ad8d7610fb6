//! Bounded retry for transient RPC failures

use std::future::Future;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::rpc::{RetryPolicy, RpcError};

/// Outcome of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOutcome<T> {
    pub result: Result<T, RpcError>,
    /// Number of times the operation ran
    pub attempts: u32,
}

/// Run `operation`, retrying retryable errors per `policy`
///
/// The first run is not a retry: with `max_attempts = 3` the operation runs
/// at most four times. Non-retryable errors are returned immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let start_time = Instant::now();
    let mut retry = 0u32;

    loop {
        let attempts = retry + 1;
        match operation().await {
            Ok(value) => {
                if retry > 0 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        duration_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(err) if !err.is_retryable() => {
                warn!(operation = operation_name, error = %err, "Permanent error, not retrying");
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                };
            }
            Err(err) => match policy.calculate_delay(retry) {
                Some(backoff) => {
                    debug!(
                        operation = operation_name,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient error, backing off before retry"
                    );
                    sleep(backoff).await;
                    retry += 1;
                }
                None => {
                    warn!(
                        operation = operation_name,
                        attempts,
                        error = %err,
                        "Retries exhausted"
                    );
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }
            },
        }
    }
}
