use std::future::Future;
use std::time::Duration;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Bounded retry with a fixed pause between attempts.
///
/// `max_attempts` counts the first try, so the default of 3 means one
/// download plus two re-downloads.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` failed attempts.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts.max(1)
    }
}

/// Run `operation` until it succeeds, the classifier aborts, or the policy's
/// attempt budget is spent.
///
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `on_failure`: called with the running failure count after every failed
///   attempt, before any pause, so callers can publish retry state
/// - `operation`: receives the 1-based attempt number
///
/// Returns the first `Ok` result, or the last error.
pub async fn retry_with_policy<F, Fut, T, E, C, H>(
    policy: &RetryPolicy,
    classifier: C,
    mut on_failure: H,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    H: FnMut(u32, &E),
    E: std::fmt::Display,
{
    let total_attempts = policy.max_attempts.max(1);
    let mut failures = 0u32;

    loop {
        let attempt = failures + 1;
        let err = match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        failures += 1;
        on_failure(failures, &err);

        if classifier(&err) == RetryAction::Abort || !policy.allows_retry(failures) {
            return Err(err);
        }

        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {}s: {}",
            attempt,
            total_attempts,
            policy.delay.as_secs(),
            err
        );
        if !policy.delay.is_zero() {
            tokio::time::sleep(policy.delay).await;
        }
    }
}
