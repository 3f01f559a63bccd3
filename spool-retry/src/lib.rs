//! Retry and backoff policy for background buffer flushes
//!
//! Scheduled flushes touch the filesystem and can hit transient failures
//! (interrupted writes, a full pipe, a briefly locked file on some
//! platforms). This crate retries those with an exponential backoff and gives
//! up immediately on errors the caller classifies as permanent.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound on attempts, independent of the policy's elapsed-time budget
pub const MAX_ATTEMPTS: usize = 5;

/// Failure of a retried operation, carrying the last underlying error
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("operation '{operation}' gave up after {attempts} attempts: {source}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: E,
    },
    #[error("operation '{operation}' failed permanently: {source}")]
    Permanent {
        operation: &'static str,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The error returned by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => source,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = std::result::Result<T, RetryError<E>>;

/// Classifies an error as worth retrying or not
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl RetryableError for std::io::Error {
    fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
        )
    }
}

/// Execute an operation with the default flush backoff policy
pub async fn with_backoff<F, T, E>(op_name: &'static str, f: F) -> RetryResult<T, E>
where
    F: FnMut(usize) -> BoxFuture<'static, Result<T, E>>,
    E: std::error::Error + RetryableError + 'static,
{
    with_custom_backoff(op_name, flush_backoff_policy(), f).await
}

/// Execute an operation with a custom backoff policy
///
/// The closure receives the 1-based attempt number. Permanent errors end the
/// loop on the spot; transient ones are retried until either the policy's
/// elapsed-time budget or [`MAX_ATTEMPTS`] runs out.
pub async fn with_custom_backoff<F, T, E>(
    op_name: &'static str,
    mut policy: ExponentialBackoff,
    mut f: F,
) -> RetryResult<T, E>
where
    F: FnMut(usize) -> BoxFuture<'static, Result<T, E>>,
    E: std::error::Error + RetryableError + 'static,
{
    policy.reset();
    let mut attempt = 1;

    loop {
        debug!(operation = op_name, attempt, "attempting operation");

        let err = match f(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.is_permanent() {
            warn!(operation = op_name, attempt, error = %err, "operation failed permanently");
            return Err(RetryError::Permanent {
                operation: op_name,
                source: err,
            });
        }

        let delay = match policy.next_backoff() {
            Some(delay) if attempt < MAX_ATTEMPTS => delay,
            _ => {
                return Err(RetryError::Exhausted {
                    operation: op_name,
                    attempts: attempt,
                    source: err,
                })
            }
        };

        warn!(
            operation = op_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
        );
        attempt += 1;

        #[cfg(feature = "async-rt")]
        tokio::time::sleep(delay).await;

        #[cfg(not(feature = "async-rt"))]
        std::thread::sleep(delay);
    }
}

/// Backoff policy for scheduled buffer flushes
///
/// Local file I/O either recovers quickly or not at all, so the budget is
/// short compared to the persistence period.
pub fn flush_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_interval(Duration::from_secs(1))
        .with_max_elapsed_time(Some(Duration::from_secs(10)))
        .with_multiplier(2.0)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(2))
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let result: RetryResult<&str, io::Error> =
            with_custom_backoff("flush", fast_policy(), |_| async { Ok("done") }.boxed()).await;

        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = with_custom_backoff("flush", fast_policy(), move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"))
                } else {
                    Ok(n)
                }
            }
            .boxed()
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: RetryResult<(), io::Error> =
            with_custom_backoff("flush", fast_policy(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")) }.boxed()
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let result: RetryResult<(), io::Error> = with_custom_backoff("flush", fast_policy(), |_| {
            async { Err(io::Error::new(io::ErrorKind::WouldBlock, "busy")) }.boxed()
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, source, .. }) => {
                assert_eq!(attempts, MAX_ATTEMPTS);
                assert_eq!(source.kind(), io::ErrorKind::WouldBlock);
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }
}
