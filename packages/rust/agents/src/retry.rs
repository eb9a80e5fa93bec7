//! Exponential backoff around a completion client.
//!
//! Only transport failures, HTTP 429 and 5xx are retried; everything else
//! is returned on the first attempt.

use std::time::Duration;

use async_trait::async_trait;
use longform_shared::{CompletionConfig, LongformError, Result};
use tracing::warn;

use crate::completion::{CompletionClient, CompletionRequest, CompletionResponse};

/// Upper bound for a single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CompletionConfig::default())
    }
}

impl From<&CompletionConfig> for RetryPolicy {
    fn from(config: &CompletionConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// True for failures worth another attempt.
pub fn is_transient(err: &LongformError) -> bool {
    match err {
        LongformError::Network(_) => true,
        LongformError::CompletionStatus { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: CompletionClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for RetryingClient<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut retry = 0;
        loop {
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if retry < self.policy.max_retries && is_transient(&e) => {
                    let delay = self.policy.delay_for(retry);
                    warn!(
                        error = %e,
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        "completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::completion::Message;
    use crate::http::HttpCompletionClient;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn ok_body() -> serde_json::Value {
        json!({"choices": [{"message": {"role": "assistant", "content": "ok"}}]})
    }

    #[test]
    fn delays_double_and_cap() {
        let p = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2000));
        assert_eq!(p.delay_for(3), Duration::from_secs(3));
        assert_eq!(p.delay_for(40), Duration::from_secs(3));
    }

    #[test]
    fn transient_classification() {
        assert!(is_transient(&LongformError::Network("reset".into())));
        assert!(is_transient(&LongformError::CompletionStatus {
            status: 503,
            message: String::new()
        }));
        assert!(!is_transient(&LongformError::CompletionStatus {
            status: 401,
            message: String::new()
        }));
        assert!(!is_transient(&LongformError::Timeout));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let inner = HttpCompletionClient::new(&server.uri(), "k", "m").unwrap();
        let client = RetryingClient::new(inner, policy(3));
        let out = client
            .complete(CompletionRequest::new(vec![Message::user("x")]))
            .await
            .expect("retried");
        assert_eq!(out.message.content(), "ok");
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let inner = HttpCompletionClient::new(&server.uri(), "k", "m").unwrap();
        let client = RetryingClient::new(inner, policy(2));
        let err = client
            .complete(CompletionRequest::new(vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LongformError::CompletionStatus { status: 429, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let inner = HttpCompletionClient::new(&server.uri(), "k", "m").unwrap();
        let client = RetryingClient::new(inner, policy(3));
        assert!(
            client
                .complete(CompletionRequest::new(vec![Message::user("x")]))
                .await
                .is_err()
        );
    }
}
