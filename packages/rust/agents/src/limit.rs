//! Request pacing around a completion client.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use longform_shared::{CompletionConfig, LongformError, Result};
use tokio::time::Instant;
use tracing::debug;

use crate::completion::{CompletionClient, CompletionRequest, CompletionResponse};

/// Spaces requests at least `interval` apart, shared by every caller of
/// the client. A burst of one: no request ever starts early.
pub struct RateLimitedClient<C> {
    inner: C,
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl<C: CompletionClient> RateLimitedClient<C> {
    pub fn new(inner: C, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// `requests_per_minute` evenly spaced; 0 disables pacing.
    pub fn per_minute(inner: C, requests_per_minute: u32) -> Self {
        let interval = match requests_per_minute {
            0 => Duration::ZERO,
            n => Duration::from_secs(60) / n,
        };
        Self::new(inner, interval)
    }

    pub fn from_config(inner: C, config: &CompletionConfig) -> Self {
        Self::per_minute(inner, config.requests_per_minute)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next slot and return how long to wait for it.
    fn reserve(&self) -> Result<Duration> {
        let mut next = self
            .next_slot
            .lock()
            .map_err(|_| LongformError::protocol("rate limiter poisoned"))?;
        let now = Instant::now();
        let slot = (*next).max(now);
        *next = slot + self.interval;
        Ok(slot - now)
    }
}

#[async_trait]
impl<C: CompletionClient> CompletionClient for RateLimitedClient<C> {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let wait = self.reserve()?;
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "pacing completion request");
            tokio::time::sleep(wait).await;
        }
        self.inner.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::completion::Message;
    use crate::testing::ScriptedClient;

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("x")])
    }

    #[test]
    fn thirty_per_minute_is_two_seconds_apart() {
        let client = RateLimitedClient::per_minute(ScriptedClient::new(vec![]), 30);
        assert_eq!(client.interval(), Duration::from_secs(2));
        let unlimited = RateLimitedClient::per_minute(ScriptedClient::new(vec![]), 0);
        assert_eq!(unlimited.interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_spaced_by_the_interval() {
        let client = RateLimitedClient::per_minute(
            ScriptedClient::new(vec![
                Message::assistant("a"),
                Message::assistant("b"),
                Message::assistant("c"),
            ]),
            30,
        );
        let start = Instant::now();
        client.complete(request()).await.expect("first");
        assert!(start.elapsed() < Duration::from_millis(1));
        client.complete(request()).await.expect("second");
        client.complete(request()).await.expect("third");
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_pace() {
        let client = Arc::new(RateLimitedClient::per_minute(
            ScriptedClient::new((0..4).map(|_| Message::assistant("ok")).collect()),
            60,
        ));
        let start = Instant::now();
        let calls: Vec<_> = (0..4)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.complete(request()).await })
            })
            .collect();
        for call in calls {
            call.await.expect("join").expect("complete");
        }
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_is_not_banked() {
        let client = RateLimitedClient::per_minute(
            ScriptedClient::new(vec![Message::assistant("a"), Message::assistant("b")]),
            30,
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        let start = Instant::now();
        client.complete(request()).await.expect("first");
        client.complete(request()).await.expect("second");
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
