//! Future Ticketing REST client.
//!
//! The private API authenticates with an API key + private key exchanged
//! for a bearer token. Tokens are cached ~55 minutes in an explicit
//! [`TokenCache`] owned by the client; the clock is injected so tests can
//! drive expiry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{ApiErrorKind, ProviderApiError};

use super::{send_with_retry, Clock, RetryPolicy, SystemClock, TokenCache};

const PROVIDER: &str = "futureticketing";
const TOKEN_TTL_MINUTES: i64 = 55;

#[derive(Debug, Clone, Deserialize)]
pub struct FtOrder {
    pub id: String,
    pub customer_id: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub total: Option<Decimal>,
    pub currency: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtEntry {
    pub id: String,
    pub email: Option<String>,
    pub customer_id: Option<String>,
    pub gate: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub scanned_at: OffsetDateTime,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    orders: Vec<FtOrder>,
}

#[derive(Debug, Deserialize)]
struct EntriesResponse {
    entries: Vec<FtEntry>,
}

#[async_trait]
pub trait FutureTicketingApi: Send + Sync {
    async fn orders_since(&self, since: OffsetDateTime) -> Result<Vec<FtOrder>, ProviderApiError>;
    async fn entries_since(&self, since: OffsetDateTime)
        -> Result<Vec<FtEntry>, ProviderApiError>;
}

pub struct FutureTicketingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    private_key: String,
    policy: RetryPolicy,
    token: Mutex<TokenCache>,
    clock: Arc<dyn Clock>,
}

impl FutureTicketingClient {
    pub fn new(api_key: String, private_key: String, base_url: String) -> Self {
        Self::with_clock(api_key, private_key, base_url, Arc::new(SystemClock))
    }

    pub fn with_clock(
        api_key: String,
        private_key: String,
        base_url: String,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            api_key,
            private_key,
            policy: RetryPolicy::default(),
            token: Mutex::new(TokenCache::default()),
            clock,
        }
    }

    /// Get the cached bearer token, exchanging the key pair for a fresh one
    /// when the cache is empty or expired. The cache lock is held across
    /// the refresh so concurrent callers do not race duplicate exchanges.
    async fn bearer_token(&self) -> Result<String, ProviderApiError> {
        let mut cache = self.token.lock().await;
        let now = self.clock.now();
        if let Some(token) = cache.get(now) {
            return Ok(token.to_string());
        }

        let url = format!("{}/auth/token", self.base_url);
        let response = send_with_retry(PROVIDER, &self.policy, || {
            self.http.post(&url).json(&serde_json::json!({
                "api_key": self.api_key,
                "private_key": self.private_key,
            }))
        })
        .await?;

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|err| ProviderApiError {
                provider: PROVIDER,
                kind: ApiErrorKind::ServerError,
                status: None,
                message: format!("invalid token response: {err}"),
            })?;

        let expires_at = now + time::Duration::minutes(TOKEN_TTL_MINUTES);
        cache.store(body.token.clone(), expires_at);
        tracing::debug!(provider = PROVIDER, "Refreshed bearer token");
        Ok(body.token)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        since: OffsetDateTime,
    ) -> Result<T, ProviderApiError> {
        let token = self.bearer_token().await?;
        let since_param = since
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|err| ProviderApiError {
                provider: PROVIDER,
                kind: ApiErrorKind::ClientError,
                status: None,
                message: format!("invalid since timestamp: {err}"),
            })?;

        let url = format!("{}{path}", self.base_url);
        let response = send_with_retry(PROVIDER, &self.policy, || {
            self.http
                .get(&url)
                .query(&[("since", since_param.as_str())])
                .bearer_auth(&token)
        })
        .await?;

        response.json::<T>().await.map_err(|err| ProviderApiError {
            provider: PROVIDER,
            kind: ApiErrorKind::ServerError,
            status: None,
            message: format!("invalid response body: {err}"),
        })
    }
}

#[async_trait]
impl FutureTicketingApi for FutureTicketingClient {
    async fn orders_since(&self, since: OffsetDateTime) -> Result<Vec<FtOrder>, ProviderApiError> {
        Ok(self.fetch::<OrdersResponse>("/orders", since).await?.orders)
    }

    async fn entries_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<FtEntry>, ProviderApiError> {
        Ok(self
            .fetch::<EntriesResponse>("/entries", since)
            .await?
            .entries)
    }
}
