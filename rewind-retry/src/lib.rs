//! Retry and backoff helpers for callers of the Rewind snapshot store
//!
//! The store itself never retries: adapter failures surface unchanged and the
//! caller owns the retry policy. This crate is that policy. Errors classify
//! themselves through [`RetryableError`]; transient ones are retried on an
//! exponential backoff schedule, permanent ones stop immediately.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts made before giving up when the caller does not say otherwise
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl RetryError {
    pub fn operation(&self) -> &'static str {
        match self {
            RetryError::MaxRetriesExceeded { operation, .. }
            | RetryError::Transient { operation, .. }
            | RetryError::Permanent { operation, .. } => operation,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Execute an operation with the default backoff policy
pub async fn with_backoff<F, Fut, T>(op_name: &'static str, f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    with_custom_backoff(op_name, default_backoff_policy(), f).await
}

/// Execute an operation with a custom backoff policy
pub async fn with_custom_backoff<F, Fut, T>(
    op_name: &'static str,
    policy: ExponentialBackoff,
    f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    with_attempt_limit(op_name, policy, DEFAULT_MAX_ATTEMPTS, f).await
}

/// Execute an operation with a custom policy and attempt cap
///
/// The operation receives the 1-based attempt number. It stops at the first
/// success, the first [`RetryError::Permanent`], after `max_attempts`
/// attempts, or when the policy's elapsed-time budget runs out.
pub async fn with_attempt_limit<F, Fut, T>(
    op_name: &'static str,
    mut policy: ExponentialBackoff,
    max_attempts: usize,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    policy.reset();
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(operation = op_name, attempt, "Attempting operation");

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(operation = op_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(operation = op_name, attempt, error = %err, "Operation failed permanently");
                return Err(err);
            }
            Err(err) => {
                let delay = if attempt < max_attempts {
                    policy.next_backoff()
                } else {
                    None
                };

                match delay {
                    Some(delay) => {
                        warn!(
                            operation = op_name,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Operation failed, retrying"
                        );
                        pause(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err(RetryError::MaxRetriesExceeded {
                            operation: op_name,
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                }
            }
        }
    }
}

/// Retry an operation returning its own error type, classified by [`RetryableError`]
pub async fn retry_on_transient<F, Fut, T, E>(
    op_name: &'static str,
    policy: ExponentialBackoff,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::error::Error + Send + Sync + 'static,
{
    with_custom_backoff(op_name, policy, |attempt| {
        let operation = f(attempt);
        async move { operation.await.map_err(|e| classify(op_name, e)) }
    })
    .await
}

/// Wrap an error as transient or permanent according to its own classification
pub fn classify<E>(op_name: &'static str, err: E) -> RetryError
where
    E: RetryableError + std::error::Error + Send + Sync + 'static,
{
    if err.is_transient() {
        RetryError::Transient {
            operation: op_name,
            source: Box::new(err),
        }
    } else {
        RetryError::Permanent {
            operation: op_name,
            source: Box::new(err),
        }
    }
}

async fn pause(delay: Duration) {
    #[cfg(feature = "async-rt")]
    tokio::time::sleep(delay).await;

    #[cfg(not(feature = "async-rt"))]
    std::thread::sleep(delay);
}

/// Default backoff policy for general operations
pub fn default_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .with_multiplier(2.0)
        .build()
}

/// Backoff policy for a database or key-value store on local disk
pub fn local_storage_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(50))
        .with_max_interval(Duration::from_secs(1))
        .with_max_elapsed_time(Some(Duration::from_secs(10)))
        .with_multiplier(2.0)
        .build()
}

/// Backoff policy for calls crossing a host bridge
pub fn bridge_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .with_multiplier(1.5)
        .build()
}

/// Trait for categorizing errors as transient or permanent
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
        use std::io::ErrorKind::*;
        matches!(
            self.kind(),
            Interrupted | WouldBlock | TimedOut | ConnectionReset | ConnectionAborted | ConnectionRefused
        )
    }
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quick_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(5))
            .with_max_elapsed_time(Some(Duration::from_secs(5)))
            .build()
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let result = with_backoff("test_op", |_attempt| async { Ok("success") }).await;
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result = with_custom_backoff("test_op", quick_policy(), move |_attempt| {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if count < 2 {
                    Err(transient_error!(
                        "test_op",
                        IoError::new(ErrorKind::ConnectionRefused, "connection refused")
                    ))
                } else {
                    Ok("success")
                }
            }) as BoxFuture<'static, &str>
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result: RetryResult<&str> = with_custom_backoff("test_op", quick_policy(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(permanent_error!(
                    "test_op",
                    IoError::new(ErrorKind::PermissionDenied, "permission denied")
                ))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_limit() {
        let result: RetryResult<()> = with_attempt_limit("flaky", quick_policy(), 4, |_| async {
            Err(transient_error!("flaky", IoError::new(ErrorKind::TimedOut, "slow")))
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded { attempts, operation, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(operation, "flaky");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_on_transient_classifies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_on_transient("read", quick_policy(), move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(IoError::new(ErrorKind::Interrupted, "try again"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);

        let result: RetryResult<()> = retry_on_transient("read", quick_policy(), |_| async {
            Err(IoError::new(ErrorKind::NotFound, "gone"))
        })
        .await;
        assert!(matches!(result, Err(RetryError::Permanent { operation: "read", .. })));
    }

    #[test]
    fn test_io_error_classification() {
        assert!(IoError::new(ErrorKind::TimedOut, "t").is_transient());
        assert!(IoError::new(ErrorKind::InvalidData, "bad").is_permanent());
    }
}
