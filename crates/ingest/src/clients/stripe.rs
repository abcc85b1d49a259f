//! Stripe REST client.
//!
//! Subscription webhooks carry only a customer id; the processor fetches
//! the customer record to obtain the email for identity resolution.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ApiErrorKind, ProviderApiError};

use super::{send_with_retry, RetryPolicy};

const PROVIDER: &str = "stripe";
const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[async_trait]
pub trait StripeApi: Send + Sync {
    async fn customer(&self, id: &str) -> Result<Option<StripeCustomer>, ProviderApiError>;
}

pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    policy: RetryPolicy,
}

impl StripeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            api_key,
            policy: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl StripeApi for StripeClient {
    async fn customer(&self, id: &str) -> Result<Option<StripeCustomer>, ProviderApiError> {
        let url = format!("{}/customers/{id}", self.base_url);
        let result = send_with_retry(PROVIDER, &self.policy, || {
            self.http.get(&url).bearer_auth(&self.api_key)
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(err) if err.kind == ApiErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let customer = response
            .json::<StripeCustomer>()
            .await
            .map_err(|err| ProviderApiError {
                provider: PROVIDER,
                kind: ApiErrorKind::ServerError,
                status: None,
                message: format!("invalid response body: {err}"),
            })?;
        Ok(Some(customer))
    }
}
