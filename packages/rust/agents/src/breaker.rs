//! Circuit breaker around a completion client.
//!
//! After `threshold` consecutive failures the circuit opens and calls are
//! refused without reaching the service. Once `reset_after` has passed one
//! trial call goes through: success closes the circuit, failure reopens it.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use longform_shared::{CompletionConfig, LongformError, Result};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::completion::{CompletionClient, CompletionRequest, CompletionResponse};

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreakerClient<C> {
    inner: C,
    threshold: u32,
    reset_after: Duration,
    state: Mutex<BreakerState>,
}

impl<C: CompletionClient> CircuitBreakerClient<C> {
    pub fn new(inner: C, threshold: u32, reset_after: Duration) -> Self {
        Self {
            inner,
            threshold: threshold.max(1),
            reset_after,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn from_config(inner: C, config: &CompletionConfig) -> Self {
        Self::new(
            inner,
            config.breaker_threshold,
            Duration::from_secs(config.breaker_reset_secs),
        )
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, BreakerState>> {
        self.state
            .lock()
            .map_err(|_| LongformError::protocol("circuit breaker poisoned"))
    }

    /// Refuse while open; an expired open period lets the call through.
    fn admit(&self) -> Result<()> {
        let mut state = self.state()?;
        match state.open_until {
            Some(until) if Instant::now() < until => Err(LongformError::Completion(format!(
                "circuit open after {} consecutive failures",
                state.consecutive_failures
            ))),
            Some(_) => {
                info!("circuit half-open, trying one request");
                state.open_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record(&self, ok: bool) -> Result<()> {
        let mut state = self.state()?;
        if ok {
            if state.consecutive_failures >= self.threshold {
                info!("circuit closed");
            }
            state.consecutive_failures = 0;
            return Ok(());
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.threshold {
            warn!(
                failures = state.consecutive_failures,
                reset_ms = self.reset_after.as_millis() as u64,
                "circuit opened"
            );
            state.open_until = Some(Instant::now() + self.reset_after);
        }
        Ok(())
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for CircuitBreakerClient<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.admit()?;
        let outcome = self.inner.complete(request).await;
        self.record(outcome.is_ok())?;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::completion::Message;

    /// Fails while `failing` is set; counts every call that reaches it.
    #[derive(Default)]
    struct FlakyClient {
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for Arc<FlakyClient> {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(LongformError::CompletionStatus {
                    status: 503,
                    message: "down".into(),
                });
            }
            Ok(CompletionResponse {
                message: Message::assistant("ok"),
                finish_reason: Some("stop".into()),
            })
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("x")])
    }

    fn breaker() -> (CircuitBreakerClient<Arc<FlakyClient>>, Arc<FlakyClient>) {
        let flaky = Arc::new(FlakyClient::default());
        flaky.failing.store(true, Ordering::SeqCst);
        (
            CircuitBreakerClient::new(Arc::clone(&flaky), 5, Duration::from_secs(5)),
            flaky,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_refuses_without_calling() {
        let (client, flaky) = breaker();
        for _ in 0..5 {
            let err = client.complete(request()).await.unwrap_err();
            assert!(matches!(err, LongformError::CompletionStatus { status: 503, .. }));
        }
        let err = client.complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("circuit open after 5 consecutive failures"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_call_after_reset_closes_or_reopens() {
        let (client, flaky) = breaker();
        for _ in 0..5 {
            let _ = client.complete(request()).await;
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(client.complete(request()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 6);
        let err = client.complete(request()).await.unwrap_err();
        assert!(err.to_string().contains("circuit open"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 6);

        tokio::time::advance(Duration::from_secs(5)).await;
        flaky.failing.store(false, Ordering::SeqCst);
        client.complete(request()).await.expect("closed again");
        flaky.failing.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            let _ = client.complete(request()).await;
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 11);
        assert!(matches!(
            client.complete(request()).await.unwrap_err(),
            LongformError::CompletionStatus { .. }
        ));
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let (client, flaky) = breaker();
        for _ in 0..4 {
            let _ = client.complete(request()).await;
        }
        flaky.failing.store(false, Ordering::SeqCst);
        client.complete(request()).await.expect("ok");
        flaky.failing.store(true, Ordering::SeqCst);
        for _ in 0..4 {
            let err = client.complete(request()).await.unwrap_err();
            assert!(matches!(err, LongformError::CompletionStatus { .. }));
        }
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 9);
    }
}
