//! Retry engine (component C2).
//!
//! A single shape — `retry(action, delay_policy, deadline, on_verdict)` —
//! used by every provider call and host-lifecycle step that can transiently
//! fail. The action's error is classified by its [`safescale_error::ErrorKind`]:
//! `Aborted` stops the loop immediately, anything else is retried until the
//! deadline elapses, at which point the loop returns a `Timeout` wrapping
//! the last error.

#![forbid(unsafe_code)]

use safescale_error::{ErrorKind, Result, SafeScaleError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy)]
pub enum DelayPolicy {
    Fixed1s,
    Fixed5s,
    /// Exponential backoff starting at `initial`, doubling each attempt,
    /// never exceeding `cap`.
    Exponential { initial: Duration, cap: Duration },
}

impl DelayPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            DelayPolicy::Fixed1s => Duration::from_secs(1),
            DelayPolicy::Fixed5s => Duration::from_secs(5),
            DelayPolicy::Exponential { initial, cap } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let scaled = initial.as_millis().saturating_mul(factor as u128);
                let capped = scaled.min(cap.as_millis());
                Duration::from_millis(capped as u64)
            }
        }
    }
}

/// What happened on a given attempt — passed to the observability callback
/// only; it has no effect on control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retry,
    Done,
    Abort,
}

/// Wrap an error so the retry loop surfaces it without further attempts,
/// regardless of its original kind (spec §4.2 `StopRetry`).
pub fn stop_retry(err: SafeScaleError) -> SafeScaleError {
    safescale_error::stop_retry(err)
}

/// Run `action` until it succeeds, returns an `Aborted` error, or `deadline`
/// elapses. `on_verdict`, if given, is called after every attempt with the
/// verdict and the 1-based attempt count, for logging/metrics only.
pub async fn retry<F, Fut, T>(
    mut action: F,
    delay: DelayPolicy,
    deadline: Duration,
    mut on_verdict: Option<impl FnMut(Verdict, u32)>,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match action().await {
            Ok(value) => {
                if let Some(cb) = on_verdict.as_mut() {
                    cb(Verdict::Done, attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                if err.kind == ErrorKind::Aborted {
                    if let Some(cb) = on_verdict.as_mut() {
                        cb(Verdict::Abort, attempt);
                    }
                    warn!(attempt, "retry aborted by action");
                    return Err(err);
                }

                if let Some(cb) = on_verdict.as_mut() {
                    cb(Verdict::Retry, attempt);
                }

                let elapsed = start.elapsed();
                if elapsed >= deadline {
                    let msg = format!(
                        "deadline of {:?} exceeded after {attempt} attempts: {err}",
                        deadline
                    );
                    warn!(attempt, "retry deadline exceeded");
                    return Err(SafeScaleError::timeout(msg).with_source(err));
                }

                // The next attempt would start at `elapsed + delay_for_next`; if
                // that lands on or past the deadline, surface Timeout now rather
                // than sleeping (possibly truncated to `remaining`) and firing an
                // attempt that was never going to land before the deadline.
                let delay_for_next = delay.delay_for_attempt(attempt);
                if elapsed + delay_for_next >= deadline {
                    let msg = format!(
                        "deadline of {:?} exceeded after {attempt} attempts: {err}",
                        deadline
                    );
                    warn!(attempt, "retry deadline exceeded");
                    return Err(SafeScaleError::timeout(msg).with_source(err));
                }

                debug!(attempt, delay = ?delay_for_next, "retrying after transient error");
                tokio::time::sleep(delay_for_next).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let calls = AtomicU32::new(0);
        let result = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SafeScaleError::not_available("not ready"))
                    } else {
                        Ok(42)
                    }
                }
            },
            DelayPolicy::Fixed1s,
            Duration::from_secs(10),
            None::<fn(Verdict, u32)>,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SafeScaleError::aborted("name collision, do not retry")) }
            },
            DelayPolicy::Fixed1s,
            Duration::from_secs(10),
            None::<fn(Verdict, u32)>,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_surfaces_timeout_on_deadline() {
        let result: Result<i32> = retry(
            || async { Err(SafeScaleError::not_available("still creating")) },
            DelayPolicy::Fixed5s,
            Duration::from_millis(1),
            None::<fn(Verdict, u32)>,
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_on_verdict_called_with_attempt_counts() {
        let verdicts = std::sync::Mutex::new(Vec::new());
        let calls = AtomicU32::new(0);
        let _ = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err(SafeScaleError::not_available("retry me"))
                    } else {
                        Ok(())
                    }
                }
            },
            DelayPolicy::Fixed1s,
            Duration::from_secs(5),
            Some(|v: Verdict, attempt: u32| verdicts.lock().unwrap().push((v, attempt))),
        )
        .await;
        let recorded = verdicts.into_inner().unwrap();
        assert_eq!(recorded, vec![(Verdict::Retry, 1), (Verdict::Done, 2)]);
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let policy = DelayPolicy::Exponential {
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn test_stop_retry_marks_aborted() {
        let err = stop_retry(SafeScaleError::not_available("x"));
        assert_eq!(err.kind, ErrorKind::Aborted);
    }
}
