//! GoCardless REST client.
//!
//! Processors look up payment/mandate/subscription/customer detail keyed
//! by the ids in a webhook's `links`. A 404 comes back as `Ok(None)` —
//! missing linkage is a data-quality condition the handlers skip over,
//! not a processing failure.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{ApiErrorKind, ProviderApiError};

use super::{send_with_retry, RetryPolicy};

const PROVIDER: &str = "gocardless";
const DEFAULT_BASE_URL: &str = "https://api.gocardless.com";
const API_VERSION: &str = "2015-07-06";

/// Accept integer minor units serialized as either a number or a string
/// (GoCardless emits both, depending on the endpoint).
pub(crate) fn de_minor_units<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcPayment {
    pub id: String,
    #[serde(deserialize_with = "de_minor_units")]
    pub amount: i64,
    pub currency: String,
    pub status: Option<String>,
    #[serde(default)]
    pub links: GcPaymentLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcPaymentLinks {
    pub mandate: Option<String>,
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcMandate {
    pub id: String,
    pub status: Option<String>,
    #[serde(default)]
    pub links: GcMandateLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcMandateLinks {
    pub customer: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcSubscription {
    pub id: String,
    pub name: Option<String>,
    pub interval_unit: Option<String>,
    #[serde(default)]
    pub links: GcSubscriptionLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GcSubscriptionLinks {
    pub mandate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcCustomer {
    pub id: String,
    pub email: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub phone_number: Option<String>,
}

#[async_trait]
pub trait GoCardlessApi: Send + Sync {
    async fn payment(&self, id: &str) -> Result<Option<GcPayment>, ProviderApiError>;
    async fn mandate(&self, id: &str) -> Result<Option<GcMandate>, ProviderApiError>;
    async fn subscription(&self, id: &str) -> Result<Option<GcSubscription>, ProviderApiError>;
    async fn customer(&self, id: &str) -> Result<Option<GcCustomer>, ProviderApiError>;
}

pub struct GoCardlessClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    policy: RetryPolicy,
}

impl GoCardlessClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(access_token, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(access_token: String, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            access_token,
            policy: RetryPolicy::default(),
        }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ProviderApiError> {
        let url = format!("{}{path}", self.base_url);
        let result = send_with_retry(PROVIDER, &self.policy, || {
            self.http
                .get(&url)
                .bearer_auth(&self.access_token)
                .header("GoCardless-Version", API_VERSION)
        })
        .await;

        let response = match result {
            Ok(response) => response,
            Err(err) if err.kind == ApiErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let body = response.json::<T>().await.map_err(|err| ProviderApiError {
            provider: PROVIDER,
            kind: ApiErrorKind::ServerError,
            status: None,
            message: format!("invalid response body: {err}"),
        })?;
        Ok(Some(body))
    }
}

#[derive(Deserialize)]
struct PaymentEnvelope {
    payments: GcPayment,
}

#[derive(Deserialize)]
struct MandateEnvelope {
    mandates: GcMandate,
}

#[derive(Deserialize)]
struct SubscriptionEnvelope {
    subscriptions: GcSubscription,
}

#[derive(Deserialize)]
struct CustomerEnvelope {
    customers: GcCustomer,
}

#[async_trait]
impl GoCardlessApi for GoCardlessClient {
    async fn payment(&self, id: &str) -> Result<Option<GcPayment>, ProviderApiError> {
        Ok(self
            .fetch::<PaymentEnvelope>(&format!("/payments/{id}"))
            .await?
            .map(|e| e.payments))
    }

    async fn mandate(&self, id: &str) -> Result<Option<GcMandate>, ProviderApiError> {
        Ok(self
            .fetch::<MandateEnvelope>(&format!("/mandates/{id}"))
            .await?
            .map(|e| e.mandates))
    }

    async fn subscription(&self, id: &str) -> Result<Option<GcSubscription>, ProviderApiError> {
        Ok(self
            .fetch::<SubscriptionEnvelope>(&format!("/subscriptions/{id}"))
            .await?
            .map(|e| e.subscriptions))
    }

    async fn customer(&self, id: &str) -> Result<Option<GcCustomer>, ProviderApiError> {
        Ok(self
            .fetch::<CustomerEnvelope>(&format!("/customers/{id}"))
            .await?
            .map(|e| e.customers))
    }
}
