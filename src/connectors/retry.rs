use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::MailError;

/// How often a retryable failure is repeated before it is surfaced.
///
/// The default never retries: the first failure aborts the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(32),
        }
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::none()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, MailError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MailError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "{operation} failed (attempt {attempt}/{}), retrying in {:?}: {error}",
                    policy.max_retries, backoff
                );
                sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use super::{with_retry, RetryPolicy};
    use crate::error::MailError;

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn unavailable() -> MailError {
        MailError::Api {
            status: 503,
            body: "backend error".to_string(),
        }
    }

    #[tokio::test]
    async fn default_policy_surfaces_first_failure() {
        let calls = Cell::new(0);
        let result: Result<(), MailError> = with_retry(&RetryPolicy::none(), "list", || {
            calls.set(calls.get() + 1);
            async { Err(unavailable()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn retryable_failures_are_repeated_up_to_the_limit() {
        let calls = Cell::new(0);
        let result: Result<(), MailError> = with_retry(&instant_policy(3), "list", || {
            calls.set(calls.get() + 1);
            async { Err(unavailable()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let calls = Cell::new(0);
        let result = with_retry(&instant_policy(2), "list", || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt < 2 {
                    Err(unavailable())
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .expect("second attempt succeeds");
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn fatal_failures_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), MailError> = with_retry(&instant_policy(5), "delete", || {
            calls.set(calls.get() + 1);
            async {
                Err(MailError::Api {
                    status: 400,
                    body: "invalid id".to_string(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}
