//! The retry/fallback controller (§4.F).
//!
//! For a single `(provider, model)` target, runs up to `max_retries + 1`
//! attempts, backing off `min(initial * 2^(n-1), max)` plus ±20% jitter
//! between them (or the provider-indicated `retry_after`, if smaller).
//! Only `rate_limited` and `provider_transient` are retried; anything
//! else exhausts the target immediately. The caller (the dispatcher)
//! walks the fallback list across targets — this module handles one
//! target's retry budget and reports how many retries it spent.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;

/// Outcome of running the retry budget for one `(provider, model)`
/// target.
pub struct AttemptOutcome<T> {
    pub result: Result<T, DispatchError>,
    /// Number of retries performed before `result` was produced — 0 if
    /// the first attempt succeeded or failed terminally.
    pub retries: u32,
}

/// Runs `attempt` up to `max_retries + 1` times, honoring `cancellation`
/// between attempts and during backoff sleeps.
///
/// `attempt` is called fresh for every try — it's expected to re-select
/// a key and rebuild the upstream call each time (§4.C notes the
/// selector is stateless and re-invoked per attempt).
pub async fn run_with_retries<F, Fut, T>(
    max_retries: u32,
    backoff_initial: Duration,
    backoff_max: Duration,
    cancellation: &CancellationToken,
    mut attempt: F,
) -> AttemptOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DispatchError>>,
{
    let mut retries = 0u32;
    loop {
        if cancellation.is_cancelled() {
            return AttemptOutcome {
                result: Err(DispatchError::canceled("canceled before attempt started")),
                retries,
            };
        }

        let result = attempt().await;
        match result {
            Ok(value) => {
                return AttemptOutcome {
                    result: Ok(value),
                    retries,
                };
            }
            Err(err) if err.retryable() && retries < max_retries => {
                let delay = backoff_delay(backoff_initial, backoff_max, retries + 1, err.retry_after);
                retries += 1;

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancellation.cancelled() => {
                        return AttemptOutcome {
                            result: Err(DispatchError::canceled("canceled during backoff")),
                            retries,
                        };
                    }
                }
            }
            Err(err) => {
                return AttemptOutcome {
                    result: Err(err),
                    retries,
                };
            }
        }
    }
}

/// `min(initial * 2^(n-1), max)` with ±20% jitter, or the
/// provider-indicated `retry_after` when present and smaller than the
/// computed cap.
fn backoff_delay(
    initial: Duration,
    max: Duration,
    attempt_number: u32,
    retry_after: Option<Duration>,
) -> Duration {
    let exponent = attempt_number.saturating_sub(1).min(32);
    let scaled = initial.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
    let capped = scaled.min(max);

    let jittered = jitter(capped);

    match retry_after {
        Some(provider_delay) if provider_delay < jittered => provider_delay,
        _ => jittered,
    }
}

fn jitter(base: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..=1.2);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_on_first_attempt_with_zero_retries() {
        let cancellation = CancellationToken::new();
        let outcome = run_with_retries(2, Duration::from_millis(1), Duration::from_millis(10), &cancellation, || async {
            Ok::<_, DispatchError>(42)
        })
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.retries, 0);
    }

    #[tokio::test]
    async fn retries_transient_errors_up_to_budget_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancellation = CancellationToken::new();
        let outcome = run_with_retries(
            2,
            Duration::from_millis(1),
            Duration::from_millis(5),
            &cancellation,
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(DispatchError::provider_transient("boom"))
                    } else {
                        Ok(100)
                    }
                }
            },
        )
        .await;
        assert_eq!(outcome.result.unwrap(), 100);
        assert_eq!(outcome.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn max_retries_zero_makes_one_attempt_then_surfaces_error() {
        let cancellation = CancellationToken::new();
        let outcome: AttemptOutcome<()> = run_with_retries(
            0,
            Duration::from_millis(1),
            Duration::from_millis(5),
            &cancellation,
            || async { Err(DispatchError::provider_transient("boom")) },
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.retries, 0);
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancellation = CancellationToken::new();
        let outcome: AttemptOutcome<()> = run_with_retries(
            3,
            Duration::from_millis(1),
            Duration::from_millis(5),
            &cancellation,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::invalid_request("bad payload"))
                }
            },
        )
        .await;
        assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::InvalidRequest);
        assert_eq!(outcome.retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_during_backoff_returns_canceled_promptly() {
        let cancellation = CancellationToken::new();
        let token_clone = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token_clone.cancel();
        });

        let outcome: AttemptOutcome<()> = run_with_retries(
            5,
            Duration::from_secs(10),
            Duration::from_secs(10),
            &cancellation,
            || async { Err(DispatchError::provider_transient("boom")) },
        )
        .await;
        assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::Canceled);
    }

    #[test]
    fn backoff_caps_at_max_and_respects_smaller_retry_after() {
        let delay = backoff_delay(
            Duration::from_millis(250),
            Duration::from_secs(8),
            10,
            Some(Duration::from_secs(1)),
        );
        assert!(delay <= Duration::from_secs(1) + Duration::from_millis(1));
    }
}
