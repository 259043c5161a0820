use std::time::Duration;

use futures::future::BoxFuture;
use tracing::warn;

use quorum_core::config::{ModelConfig, RetryConfig};
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::LlmClient;
use quorum_core::types::*;

/// An LLM client that retries transient failures with exponential backoff.
///
/// Token-limit errors are never retried; the caller decides what to do.
pub struct RetryingClient {
    inner: Box<dyn LlmClient>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(inner: Box<dyn LlmClient>, retry_config: RetryConfig) -> Self {
        Self {
            inner,
            retry_config,
        }
    }
}

fn is_retryable(e: &QuorumError) -> bool {
    match e {
        QuorumError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms.saturating_mul(2u64.saturating_pow(attempt)))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<Message>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ChatResponse>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let max_retries = self.retry_config.max_retries;
            let mut attempt = 0;
            loop {
                match self.inner.chat(&config, messages.clone(), &tools).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) if is_retryable(&e) && attempt < max_retries => {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails with the given error `failures` times, then succeeds.
    struct Flaky {
        failures: u32,
        calls: Arc<AtomicU32>,
        error: fn() -> QuorumError,
    }

    impl LlmClient for Flaky {
        fn chat(
            &self,
            _config: &ModelConfig,
            _messages: Vec<Message>,
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'_, Result<ChatResponse>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    Err((self.error)())
                } else {
                    Ok(ChatResponse::text("ok"))
                }
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 2,
                calls: calls.clone(),
                error: || QuorumError::LlmRequest("HTTP 503: busy".into()),
            }),
            fast_retry(),
        );
        let resp = client.chat(&ModelConfig::new("m"), vec![], &[]).await.unwrap();
        assert_eq!(resp.text, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn token_limit_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = RetryingClient::new(
            Box::new(Flaky {
                failures: 5,
                calls: calls.clone(),
                error: || QuorumError::TokenLimitExceeded("too long".into()),
            }),
            fast_retry(),
        );
        let err = client.chat(&ModelConfig::new("m"), vec![], &[]).await.unwrap_err();
        assert!(matches!(err, QuorumError::TokenLimitExceeded(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig {
            max_retries: 10,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
        };
        let d = calculate_backoff(8, &config);
        assert!(d <= Duration::from_millis(4800));
    }
}
