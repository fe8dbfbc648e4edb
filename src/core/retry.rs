use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use super::error::SyncError;

/// Attempt budget and backoff base for a retried remote mutation.
/// Stateless; a single policy value is reused across calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Delay before attempt `attempt` (1-based): the first attempt runs
/// immediately, attempt k waits `base_delay * (k - 1)`.
pub fn backoff_delay(policy: RetryPolicy, attempt: u32) -> Duration {
    policy.base_delay * attempt.saturating_sub(1)
}

/// Run `op` until it succeeds or the attempt budget is spent, sleeping
/// the linear backoff between attempts. The operation must be idempotent;
/// nothing here dedups side effects beyond counting attempts.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    for attempt in 1..=policy.max_attempts {
        let delay = backoff_delay(policy, attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    "{} attempt {}/{} failed: {}",
                    operation, attempt, policy.max_attempts, e
                );
                last_error = Some(e);
            }
        }
    }
    Err(SyncError::RetryExhausted {
        operation: operation.to_string(),
        attempts: policy.max_attempts,
        source: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts were made")),
    })
}
