// Retry logic with exponential backoff for transport failures
// Only failures known to have left the remote chain untouched are retried for writes

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::chains::TransportError;
use crate::config::RetryConfig;
use crate::metrics::OrchestratorMetrics;

/// Which failures a call may be retried on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Reads: any transport failure is safe to repeat
    Query,
    /// Writes: only requests that never reached the chain
    Submission,
}

impl RetryClass {
    fn allows(&self, error: &TransportError) -> bool {
        match self {
            RetryClass::Query => !matches!(error, TransportError::Rejected { .. }),
            RetryClass::Submission => matches!(error, TransportError::NotSubmitted(_)),
        }
    }
}

/// Bound a single transport call. A call still running at `limit` is
/// reported as `Timeout`, which callers treat as ambiguous.
pub async fn bounded<T, Fut>(limit: Duration, call: Fut) -> Result<T, TransportError>
where
    Fut: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}

/// Exponential backoff with jitter
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<Arc<OrchestratorMetrics>>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<OrchestratorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the retry budget is spent
    pub async fn run<F, Fut, T>(
        &self,
        operation_name: &str,
        class: RetryClass,
        operation: F,
    ) -> Result<T, TransportError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt = 0;
        let mut delay_ms = self.config.initial_delay_ms;

        loop {
            attempt += 1;
            debug!("Executing '{}' attempt {}/{}", operation_name, attempt, self.config.max_retries + 1);

            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if class.allows(&error) && attempt <= self.config.max_retries => {
                    let wait = (delay_ms + self.calculate_jitter(delay_ms)).min(self.config.max_delay_ms);
                    warn!(
                        "Operation '{}' failed (attempt {}/{}), retrying in {}ms: {}",
                        operation_name,
                        attempt,
                        self.config.max_retries + 1,
                        wait,
                        error
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.retries.inc();
                    }
                    sleep(Duration::from_millis(wait)).await;
                    delay_ms = (delay_ms as f64 * self.config.backoff_multiplier) as u64;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Calculate jitter to avoid thundering herd
    pub fn calculate_jitter(&self, base_delay_ms: u64) -> u64 {
        if self.config.jitter_factor <= 0.0 {
            return 0;
        }

        let max_jitter = (base_delay_ms as f64 * self.config.jitter_factor) as u64;
        fastrand::u64(0..=max_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    #[tokio::test]
    async fn test_query_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("balances", RetryClass::Query, || {
                let count = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(TransportError::Timeout)
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_submission_never_retries_ambiguous_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("delegate", RetryClass::Submission, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::ConnectionLost("reset by peer".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(TransportError::ConnectionLost(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submission_retries_unsent_requests() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(2)
            .run("delegate", RetryClass::Submission, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::NotSubmitted("connection refused".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(TransportError::NotSubmitted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejections_are_terminal() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("balances", RetryClass::Query, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::Rejected { code: 18, log: "invalid request".to_string() }) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result = tokio_test::block_on(fast_policy(3).run("sequence", RetryClass::Submission, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TransportError>(7u64) }
        }));

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_call_times_out() {
        let result: Result<(), _> = bounded(Duration::from_millis(5), std::future::pending()).await;
        assert_eq!(result, Err(TransportError::Timeout));

        let result = bounded(Duration::from_millis(5), async { Ok::<_, TransportError>(1) }).await;
        assert_eq!(result, Ok(1));
    }

    #[tokio::test]
    async fn test_backoff_between_unsent_attempts_is_not_a_timeout() {
        // Each attempt is bounded on its own, so waiting between attempts
        // never turns a known failure into a timeout
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 2,
            initial_delay_ms: 30,
            max_delay_ms: 30,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        });
        let result: Result<(), _> = policy
            .run("delegate", RetryClass::Submission, || {
                calls.fetch_add(1, Ordering::SeqCst);
                bounded(Duration::from_millis(20), async {
                    Err(TransportError::NotSubmitted("connection refused".to_string()))
                })
            })
            .await;

        assert!(matches!(result, Err(TransportError::NotSubmitted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_jitter() {
        assert_eq!(fast_policy(1).calculate_jitter(100), 0);
    }
}
