use std::future::Future;

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::warn;

use crate::error::AppError;

/// Exponential backoff policy for transient dependency errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub multiplier: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay sequence: base, base*multiplier, base*multiplier², ... with
    /// jitter, capped at `max_attempts` total attempts.
    fn backoff(&self) -> impl Iterator<Item = std::time::Duration> {
        ExponentialBackoff::from_millis(self.multiplier.max(2))
            .factor(self.base_delay_ms / self.multiplier.max(2))
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1))
    }
}

/// Runs `operation`, retrying only when the error classifies as transient
/// (connection reset, timeout, rate limit, upstream 5xx). Retries never
/// extend the orchestrator deadline; callers wrap the whole call in their
/// remaining-time budget.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    operation_label: &str,
    operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let label = operation_label.to_owned();
    RetryIf::spawn(policy.backoff(), operation, move |err: &AppError| {
        let transient = err.is_transient();
        if transient {
            warn!(operation = %label, error = %err, "Transient failure; retrying with backoff");
        }
        transient
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 2,
            multiplier: 2,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result = retry_transient(fast_policy(), "llm", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::LlmTimeout("slow upstream".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.expect("should succeed on third attempt"), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), AppError> = retry_transient(fast_policy(), "llm", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::LlmTimeout("always slow".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), AppError> = retry_transient(fast_policy(), "llm", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::InvalidQuery("empty".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
