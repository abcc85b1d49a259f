//! Provider REST clients and the retry/backoff machinery they share.
//!
//! All clients apply the same policy: 429/503 honor `Retry-After` when the
//! provider sends one, otherwise exponential backoff with jitter; other
//! 4xx responses fail immediately; 5xx and transport errors retry until
//! the attempt budget is spent, which surfaces as
//! [`ApiErrorKind::Exhausted`].

pub mod futureticketing;
pub mod gocardless;
pub mod stripe;

use std::time::Duration;

use time::OffsetDateTime;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::error::{ApiErrorKind, ProviderApiError};

/// Retry budget for one logical API call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delays(&self) -> impl Iterator<Item = Duration> {
        // base * 2^attempt, jittered, capped at max_delay.
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay_ms / 2)
            .max_delay(self.max_delay)
            .map(jitter)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Send a request, retrying transient failures per the policy.
///
/// `build` is invoked once per attempt since a `RequestBuilder` is
/// consumed by `send`.
pub(crate) async fn send_with_retry<F>(
    provider: &'static str,
    policy: &RetryPolicy,
    build: F,
) -> Result<reqwest::Response, ProviderApiError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let last_attempt = attempt >= policy.max_attempts;

        let response = match build().send().await {
            Ok(response) => response,
            Err(err) => {
                if last_attempt {
                    return Err(ProviderApiError::network(provider, err));
                }
                let delay = delays.next().unwrap_or(policy.max_delay);
                tracing::warn!(
                    provider = provider,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Provider request failed at transport level; retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let status_code = status.as_u16();
        if status_code == 404 {
            return Err(ProviderApiError {
                provider,
                kind: ApiErrorKind::NotFound,
                status: Some(status_code),
                message: "resource not found".to_string(),
            });
        }

        let transient = status_code == 429 || status_code == 503 || status.is_server_error();
        if !transient {
            return Err(ProviderApiError {
                provider,
                kind: ApiErrorKind::ClientError,
                status: Some(status_code),
                message: response.text().await.unwrap_or_default(),
            });
        }

        if last_attempt {
            let kind = if status_code == 429 {
                ApiErrorKind::RateLimited
            } else {
                ApiErrorKind::Exhausted
            };
            return Err(ProviderApiError {
                provider,
                kind,
                status: Some(status_code),
                message: format!("retries exhausted after {attempt} attempts"),
            });
        }

        let delay = retry_after(&response)
            .or_else(|| delays.next())
            .unwrap_or(policy.max_delay);
        tracing::warn!(
            provider = provider,
            attempt = attempt,
            status = status_code,
            delay_ms = delay.as_millis() as u64,
            "Transient provider error; retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Injectable time source so token-expiry logic tests with a fake clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Cached bearer token with its expiry, owned by the client instance.
#[derive(Debug, Default)]
pub struct TokenCache {
    cached: Option<CachedToken>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: OffsetDateTime,
}

impl TokenCache {
    pub fn get(&self, now: OffsetDateTime) -> Option<&str> {
        self.cached
            .as_ref()
            .filter(|cached| now < cached.expires_at)
            .map(|cached| cached.token.as_str())
    }

    pub fn store(&mut self, token: String, expires_at: OffsetDateTime) {
        self.cached = Some(CachedToken { token, expires_at });
    }
}
