// Copyright (c) 2026 pmesh
// Licensed under the Apache License, Version 2.0

//! Exponential-backoff retrier. Step `n`'s delay starts at `backoff`, then
//! grows by `+backoff, *1.5` each subsequent step, capped at `backoff * 20`.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Errors surfaced by the retrier itself (as opposed to the wrapped
/// operation's own error type, which the caller supplies).
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation's own error, marked fatal by [`NonRetryable`] or by
    /// exhausting the attempt budget.
    #[error("operation failed: {0}")]
    Operation(E),
    /// The policy timeout or the caller's deadline was reached first.
    #[error("retry deadline exceeded")]
    DeadlineExceeded,
}

/// Marks a wrapped error as fatal: never retried regardless of attempts
/// remaining.
#[derive(Debug)]
pub struct NonRetryable(pub Box<dyn std::error::Error + Send + Sync>);

impl std::fmt::Display for NonRetryable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "non-retryable: {}", self.0)
    }
}

impl std::error::Error for NonRetryable {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// A retry policy.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    /// Maximum number of attempts (including the first).
    pub attempts: u32,
    /// Initial backoff; grows `+backoff, *1.5` per step, capped at
    /// `backoff * 20`.
    pub backoff: Duration,
    /// Overall timeout for the whole retry loop.
    pub timeout: Duration,
}

impl Policy {
    /// Compute the delay before attempt `n` (0-indexed, `n=0` meaning "the
    /// delay before the second attempt").
    fn delay_for_step(&self, n: u32) -> Duration {
        let cap = self.backoff.mul_f64(20.0);
        let mut delay = self.backoff;
        for _ in 0..n {
            delay = (delay + self.backoff).mul_f64(1.5);
            if delay > cap {
                return cap;
            }
        }
        delay.min(cap)
    }
}

/// Returns `false` for explicitly-wrapped fatal errors (anywhere in the
/// source chain) or a cancelled context; `true` otherwise.
pub fn retryable(err: &(dyn std::error::Error + 'static), cancelled: bool) -> bool {
    if cancelled {
        return false;
    }
    let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cause {
        if e.downcast_ref::<NonRetryable>().is_some() {
            return false;
        }
        cause = e.source();
    }
    true
}

/// Retry `op` per `policy`, honouring both the policy timeout and
/// `deadline` (whichever is tighter). `op` should return
/// `Err(NonRetryable(e))`-wrapped errors (via [`RetryError::Operation`]) to
/// signal a fatal, non-retried failure.
pub async fn retry<T, E, F, Fut>(
    policy: Policy,
    deadline: Option<Instant>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RetryOutcome<E>>>,
{
    let start = Instant::now();
    let policy_deadline = start + policy.timeout;
    let effective_deadline = match deadline {
        Some(d) => policy_deadline.min(d),
        None => policy_deadline,
    };

    let mut attempt = 0u32;
    loop {
        if Instant::now() >= effective_deadline {
            return Err(RetryError::DeadlineExceeded);
        }

        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(RetryOutcome::Fatal(e)) => return Err(RetryError::Operation(e)),
            Err(RetryOutcome::Retryable(e)) => {
                attempt += 1;
                if attempt >= policy.attempts {
                    return Err(RetryError::Operation(e));
                }
                let delay = policy.delay_for_step(attempt - 1);
                let wake_at = Instant::now() + delay;
                if wake_at >= effective_deadline {
                    return Err(RetryError::DeadlineExceeded);
                }
                tokio::time::sleep_until(wake_at).await;
            }
        }
    }
}

/// What an attempt inside [`retry`] returned.
pub enum RetryOutcome<E> {
    /// Keep retrying (subject to attempts/deadline).
    Retryable(E),
    /// Stop immediately; this error is terminal.
    Fatal(E),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_and_caps() {
        let policy = Policy {
            attempts: 10,
            backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(60),
        };
        let d0 = policy.delay_for_step(0);
        let d1 = policy.delay_for_step(1);
        assert_eq!(d0, Duration::from_millis(100));
        assert!(d1 > d0);
        let cap = policy.backoff.mul_f64(20.0);
        assert!(policy.delay_for_step(50) <= cap);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = Policy {
            attempts: 5,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        let result: Result<u32, RetryError<&str>> = retry(policy, None, |_attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(RetryOutcome::Retryable("not yet"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn retryable_rejects_wrapped_fatal_and_cancellation() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "boom")
            }
        }
        impl std::error::Error for Boom {}

        let plain = Boom;
        assert!(retryable(&plain, false));
        assert!(!retryable(&plain, true));

        let wrapped = NonRetryable(Box::new(Boom));
        assert!(!retryable(&wrapped, false));
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = Policy {
            attempts: 5,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        };
        let result: Result<u32, RetryError<&str>> = retry(policy, None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryOutcome::Fatal("boom")) }
        })
        .await;
        assert!(matches!(result, Err(RetryError::Operation("boom"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
