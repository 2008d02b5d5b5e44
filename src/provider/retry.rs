// src/provider/retry.rs — Deadline-aware retry for completion providers
//
// The orchestrator bounds each completion with `model.timeout_seconds`. A
// retry whose backoff would outlast that deadline is not attempted; the
// provider's own error is returned instead of a bare timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Completion, CompletionProvider, CompletionRequest, ModelInfo};
use crate::infra::errors::RlmError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Backoff before the first retry; doubles per attempt up to `max_delay`.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock allowance for all attempts of one completion.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, deadline: Duration) -> Self {
        Self {
            max_retries,
            deadline: Some(deadline),
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt + 1`, or `None` when `error`
    /// should be returned as is. A rate-limit hint replaces the backoff.
    fn delay_after(&self, attempt: u32, error: &RlmError) -> Option<Duration> {
        if attempt >= self.max_retries || !error.is_retriable() {
            return None;
        }
        if let RlmError::RateLimited { retry_after_ms, .. } = error {
            if *retry_after_ms > 0 {
                return Some(Duration::from_millis(*retry_after_ms));
            }
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }

    fn fits(&self, started: Instant, delay: Duration) -> bool {
        self.deadline
            .map_or(true, |deadline| started.elapsed() + delay < deadline)
    }
}

/// Retries transient failures of the wrapped provider.
pub struct RetryProvider {
    inner: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl CompletionProvider for RetryProvider {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.inner.models()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, RlmError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(completion) => return Ok(completion),
                Err(e) => e,
            };
            let Some(delay) = self.policy.delay_after(attempt, &error) else {
                return Err(error);
            };
            if !self.policy.fits(started, delay) {
                tracing::warn!(
                    provider = self.inner.id(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Not retrying, backoff would pass the call deadline: {}",
                    error
                );
                return Err(error);
            }

            tracing::warn!(
                provider = self.inner.id(),
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error: {}",
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::scripted::ScriptedProvider;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            deadline: None,
        }
    }

    fn transient() -> RlmError {
        RlmError::Provider {
            provider: "test".into(),
            message: "HTTP 500".into(),
            retriable: true,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(0, &transient()), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(1, &transient()), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_after(3, &transient()), Some(Duration::from_secs(16)));
        assert!(policy.delay_after(4, &transient()).is_none());

        let long = RetryPolicy {
            max_retries: 40,
            ..RetryPolicy::default()
        };
        assert_eq!(long.delay_after(35, &transient()), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_rate_limit_hint_and_fatal_errors() {
        let policy = RetryPolicy::default();
        let limited = RlmError::RateLimited {
            provider: "test".into(),
            retry_after_ms: 3_000,
        };
        assert_eq!(policy.delay_after(0, &limited), Some(Duration::from_millis(3_000)));

        let fatal = RlmError::Provider {
            provider: "test".into(),
            message: "HTTP 401".into(),
            retriable: false,
        };
        assert!(policy.delay_after(0, &fatal).is_none());
        assert!(policy.delay_after(0, &RlmError::NoProvider).is_none());
    }

    #[tokio::test]
    async fn test_retries_transient_failure_then_succeeds() {
        let inner = Arc::new(ScriptedProvider::new(["recovered"]));
        inner.fail_next("HTTP 503", true);
        inner.fail_next("HTTP 502", true);
        let provider = RetryProvider::new(inner.clone(), fast(3));

        let completion = provider.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(completion.text, "recovered");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_fatal_failure() {
        let inner = Arc::new(ScriptedProvider::new(["unreachable"]));
        inner.fail_next("HTTP 401", false);
        let provider = RetryProvider::new(inner.clone(), fast(3));

        let err = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = Arc::new(ScriptedProvider::new(["never"]));
        for _ in 0..5 {
            inner.fail_next("HTTP 500", true);
        }
        let provider = RetryProvider::new(inner.clone(), fast(2));

        assert!(provider.complete(CompletionRequest::default()).await.is_err());
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_backoff_past_deadline_returns_provider_error() {
        let inner = Arc::new(ScriptedProvider::new(["too late"]));
        inner.fail_next("HTTP 503", true);
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            ..RetryPolicy::new(3, Duration::from_secs(5))
        };
        let provider = RetryProvider::new(inner.clone(), policy);

        let err = provider
            .complete(CompletionRequest::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"), "{err}");
        assert_eq!(inner.calls(), 1);
    }
}
