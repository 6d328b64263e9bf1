use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for the submission call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

/// Run `op`, retrying on error with multiplicative backoff.
///
/// Makes `1 + max_retries` attempts in total; each wait is 1.5x the
/// previous one. When the budget is exhausted the last error is propagated
/// unchanged.
pub async fn with_backoff<T, E, F, Fut>(policy: RetryPolicy, context: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut retries_left = policy.max_retries;
    let mut backoff = policy.initial_backoff;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if retries_left == 0 {
                    return Err(err);
                }
                tracing::warn!(
                    context,
                    retries_left,
                    error = %err,
                    "request failed, backing off"
                );
                tokio::time::sleep(backoff).await;
                retries_left -= 1;
                backoff = backoff.mul_f64(1.5);
            }
        }
    }
}
