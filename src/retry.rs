//! Bounded exponential backoff for provider calls.
//!
//! Attempt `n` (counted from zero) that fails with a retryable error is
//! followed by a sleep of `min(2^n, 10)` backoff units before the next
//! attempt. After `max_retries + 1` attempts the last error is returned
//! unchanged.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::errors::LLMError;
use crate::llm_providers::{GenerationOverrides, LLMProvider, ProviderConfig};
use crate::log_llm_operation;

const MAX_BACKOFF_UNITS: u64 = 10;

pub type RetryCondition = fn(&LLMError) -> bool;

fn retry_every_error(_: &LLMError) -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Length of one backoff unit
    pub backoff_unit: Duration,
    retry_condition: RetryCondition,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_unit: Duration::from_secs(1),
            retry_condition: LLMError::is_retryable,
        }
    }

    /// Policy carrying the instance-level retry budget of a provider
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(config.max_retries)
    }

    /// Retry every failure, including bad keys and configuration errors
    pub fn retry_all(mut self) -> Self {
        self.retry_condition = retry_every_error;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn with_retry_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_condition = condition;
        self
    }

    pub fn should_retry(&self, error: &LLMError) -> bool {
        (self.retry_condition)(error)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let units = 1u64
            .checked_shl(attempt)
            .unwrap_or(u64::MAX)
            .min(MAX_BACKOFF_UNITS);
        self.backoff_unit * units as u32
    }

    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, LLMError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_retries || !self.should_retry(&error) {
                        log_llm_operation!(error, operation_name, error = error, retry_count = attempt);
                        return Err(error);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    log_llm_operation!(
                        retry,
                        operation_name,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = error
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Drive `provider.generate_text` under `policy`
pub async fn generate_with_retry(
    provider: &dyn LLMProvider,
    prompt: &str,
    overrides: &GenerationOverrides,
    policy: &RetryPolicy,
) -> Result<String, LLMError> {
    policy
        .execute("generate_text", || provider.generate_text(prompt, overrides))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    use crate::llm_providers::{OpenAIProvider, ProviderOptions};

    struct ScriptedProvider {
        config: ProviderConfig,
        responses: Mutex<VecDeque<Result<String, LLMError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProvider {
        fn new(max_retries: u32, responses: Vec<Result<String, LLMError>>) -> Self {
            let base = OpenAIProvider::new(
                "test-key".to_string(),
                None,
                ProviderOptions {
                    max_retries: Some(max_retries),
                    ..Default::default()
                },
            )
            .unwrap();
            Self {
                config: base.config().clone(),
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn generate_text(&self, _prompt: &str, _overrides: &GenerationOverrides) -> Result<String, LLMError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LLMError::Configuration("script exhausted".to_string())))
        }

        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        fn display_name(&self) -> &'static str {
            "Scripted"
        }

        fn config(&self) -> &ProviderConfig {
            &self.config
        }
    }

    fn transient(n: u16) -> LLMError {
        LLMError::Upstream {
            provider: "scripted".to_string(),
            status: 500 + n,
            message: "server error".to_string(),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::new(10);
        let delays: Vec<u64> = (0..6).map(|a| policy.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(10));
    }

    #[test]
    fn test_custom_backoff_unit() {
        let policy = RetryPolicy::new(3).with_backoff_unit(Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_retries() {
        let provider = ScriptedProvider::new(2, vec![Err(transient(0)), Err(transient(2)), Ok("done".to_string())]);
        let policy = RetryPolicy::from_config(provider.config());
        let start = Instant::now();

        let result = generate_with_retry(&provider, "prompt", &GenerationOverrides::default(), &policy).await;

        assert_eq!(result.unwrap(), "done");
        let calls = provider.call_times();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
        assert_eq!(calls[2] - calls[1], Duration::from_secs(2));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let last = LLMError::RateLimited {
            provider: "scripted".to_string(),
            message: "429 third time".to_string(),
        };
        let provider = ScriptedProvider::new(2, vec![Err(transient(0)), Err(transient(3)), Err(last.clone())]);
        let policy = RetryPolicy::from_config(provider.config());

        let result = generate_with_retry(&provider, "prompt", &GenerationOverrides::default(), &policy).await;

        assert_eq!(result.unwrap_err(), last);
        assert_eq!(provider.call_times().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let unauthorized = LLMError::Unauthorized {
            provider: "scripted".to_string(),
            message: "bad key".to_string(),
        };
        let provider = ScriptedProvider::new(3, vec![Err(unauthorized.clone()), Ok("never".to_string())]);
        let policy = RetryPolicy::from_config(provider.config());
        let start = Instant::now();

        let result = generate_with_retry(&provider, "prompt", &GenerationOverrides::default(), &policy).await;

        assert_eq!(result.unwrap_err(), unauthorized);
        assert_eq!(provider.call_times().len(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_all_retries_authentication_failures() {
        let unauthorized = LLMError::Unauthorized {
            provider: "scripted".to_string(),
            message: "bad key".to_string(),
        };
        let provider = ScriptedProvider::new(1, vec![Err(unauthorized), Ok("recovered".to_string())]);
        let policy = RetryPolicy::from_config(provider.config()).retry_all();

        let result = generate_with_retry(&provider, "prompt", &GenerationOverrides::default(), &policy).await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(provider.call_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_single_attempt() {
        let provider = ScriptedProvider::new(0, vec![Err(transient(0)), Ok("late".to_string())]);
        let policy = RetryPolicy::from_config(provider.config());

        let result = generate_with_retry(&provider, "prompt", &GenerationOverrides::default(), &policy).await;

        assert!(matches!(result, Err(LLMError::Upstream { status: 500, .. })));
        assert_eq!(provider.call_times().len(), 1);
    }
}
