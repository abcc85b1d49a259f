//! Ingest pipeline configuration.

use crate::error::{IngestError, IngestResult};

const DEFAULT_FUTURE_TICKETING_BASE_URL: &str = "https://api.futureticketing.ie/v1";

/// Secrets and credentials for webhook verification and provider APIs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub shopify_webhook_secret: String,
    pub stripe_webhook_secret: String,
    pub gocardless_webhook_secret: String,
    pub stripe_api_key: String,
    pub gocardless_access_token: String,
    pub future_ticketing_api_key: String,
    pub future_ticketing_private_key: String,
    pub future_ticketing_base_url: String,
}

fn require_env(name: &'static str) -> IngestResult<String> {
    std::env::var(name).map_err(|_| IngestError::Config(format!("{name} must be set")))
}

impl IngestConfig {
    pub fn from_env() -> IngestResult<Self> {
        Ok(Self {
            shopify_webhook_secret: require_env("SHOPIFY_WEBHOOK_SECRET")?,
            stripe_webhook_secret: require_env("STRIPE_WEBHOOK_SECRET")?,
            gocardless_webhook_secret: require_env("GOCARDLESS_WEBHOOK_SECRET")?,
            stripe_api_key: require_env("STRIPE_API_KEY")?,
            gocardless_access_token: require_env("GOCARDLESS_ACCESS_TOKEN")?,
            future_ticketing_api_key: require_env("FUTURE_TICKETING_API_KEY")?,
            future_ticketing_private_key: require_env("FUTURE_TICKETING_PRIVATE_KEY")?,
            future_ticketing_base_url: std::env::var("FUTURE_TICKETING_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_FUTURE_TICKETING_BASE_URL.to_string()),
        })
    }
}
