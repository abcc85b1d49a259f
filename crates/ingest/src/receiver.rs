//! Webhook receivers, one per provider.
//!
//! Each receive path: extract and verify the signature, parse the body,
//! persist the raw payload, then enqueue one message per logical event.
//! The payload write always completes before the enqueue so a processor
//! can dereference `raw_payload_ref` unconditionally. The write and the
//! enqueue are not transactional; a crash between them leaves an orphaned
//! blob and no queue message, which is an acknowledged gap.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::model::SourceSystem;
use crate::payload_store::{payload_key, PayloadStore};
use crate::queue::{QueueMessage, QueueSink};
use crate::signature::{validate_mailchimp, verify_gocardless, verify_shopify, verify_stripe};

/// Returned to the webhook sender on 202.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Receipt {
    pub received: bool,
    pub correlation_id: Uuid,
}

/// Receive-path failures, mapped to HTTP statuses at the API layer:
/// missing/invalid signature -> 401, malformed payload -> 400,
/// internal -> 500.
#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("webhook signature invalid")]
    InvalidSignature,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Internal(#[from] IngestError),
}

pub struct WebhookReceiver {
    config: IngestConfig,
    payload_store: Arc<dyn PayloadStore>,
    queue: Arc<dyn QueueSink>,
}

impl WebhookReceiver {
    pub fn new(
        config: IngestConfig,
        payload_store: Arc<dyn PayloadStore>,
        queue: Arc<dyn QueueSink>,
    ) -> Self {
        Self {
            config,
            payload_store,
            queue,
        }
    }

    /// Shopify: HMAC in `X-Shopify-Hmac-SHA256`, topic in
    /// `X-Shopify-Topic`. One queue message per webhook.
    pub async fn receive_shopify(
        &self,
        body: &[u8],
        signature: Option<&str>,
        topic: Option<&str>,
        headers: Value,
    ) -> Result<Receipt, ReceiveError> {
        let signature = signature.ok_or(ReceiveError::MissingSignature)?;
        if !verify_shopify(body, signature, &self.config.shopify_webhook_secret) {
            return Err(ReceiveError::InvalidSignature);
        }

        let payload = parse_json(body)?;
        let topic = topic
            .ok_or_else(|| ReceiveError::MalformedPayload("missing webhook topic".to_string()))?;
        let event = json!({"topic": topic, "payload": payload});

        self.store_and_enqueue(SourceSystem::Shopify, &payload, headers, vec![event])
            .await
    }

    /// Stripe: `Stripe-Signature` header. One queue message per webhook.
    pub async fn receive_stripe(
        &self,
        body: &[u8],
        signature: Option<&str>,
        headers: Value,
    ) -> Result<Receipt, ReceiveError> {
        let signature = signature.ok_or(ReceiveError::MissingSignature)?;
        if !verify_stripe(body, signature, &self.config.stripe_webhook_secret) {
            return Err(ReceiveError::InvalidSignature);
        }

        let payload = parse_json(body)?;
        self.store_and_enqueue(SourceSystem::Stripe, &payload.clone(), headers, vec![payload])
            .await
    }

    /// GoCardless: `Webhook-Signature` header, payload batches sub-events
    /// under `events[]`. One queue message per sub-event.
    pub async fn receive_gocardless(
        &self,
        body: &[u8],
        signature: Option<&str>,
        headers: Value,
    ) -> Result<Receipt, ReceiveError> {
        let signature = signature.ok_or(ReceiveError::MissingSignature)?;
        if !verify_gocardless(body, signature, &self.config.gocardless_webhook_secret) {
            return Err(ReceiveError::InvalidSignature);
        }

        let payload = parse_json(body)?;
        let events = payload
            .get("events")
            .and_then(Value::as_array)
            .ok_or_else(|| ReceiveError::MalformedPayload("missing events array".to_string()))?
            .clone();

        self.store_and_enqueue(SourceSystem::Gocardless, &payload, headers, events)
            .await
    }

    /// Mailchimp sends no signature; verification degrades to the
    /// structural `type` + `data` check. Bodies arrive as JSON or
    /// form-urlencoded.
    pub async fn receive_mailchimp(
        &self,
        body: &[u8],
        headers: Value,
    ) -> Result<Receipt, ReceiveError> {
        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(value) if value.is_object() => value,
            _ => parse_form_body(body)?,
        };

        if !validate_mailchimp(&payload) {
            return Err(ReceiveError::InvalidSignature);
        }

        self.store_and_enqueue(SourceSystem::Mailchimp, &payload.clone(), headers, vec![payload])
            .await
    }

    async fn store_and_enqueue(
        &self,
        provider: SourceSystem,
        payload: &Value,
        headers: Value,
        events: Vec<Value>,
    ) -> Result<Receipt, ReceiveError> {
        let correlation_id = Uuid::new_v4();
        let received_at = OffsetDateTime::now_utc();
        let key = payload_key(provider, received_at, correlation_id);

        let stored = json!({
            "payload": payload,
            "received_at": received_at.format(&Rfc3339).unwrap_or_default(),
            "headers": headers,
        });
        self.payload_store.put(&key, &stored).await?;

        let event_count = events.len();
        for event in events {
            self.queue
                .enqueue(
                    provider,
                    &QueueMessage {
                        event,
                        raw_payload_ref: key.clone(),
                        correlation_id,
                    },
                )
                .await?;
        }

        tracing::info!(
            provider = %provider,
            correlation_id = %correlation_id,
            events = event_count,
            "Webhook received and enqueued"
        );
        Ok(Receipt {
            received: true,
            correlation_id,
        })
    }
}

fn parse_json(body: &[u8]) -> Result<Value, ReceiveError> {
    serde_json::from_slice(body).map_err(|err| ReceiveError::MalformedPayload(err.to_string()))
}

/// Unflatten a form-urlencoded Mailchimp body
/// (`type=click&data[email]=...&data[merges][FNAME]=...`) into JSON.
fn parse_form_body(body: &[u8]) -> Result<Value, ReceiveError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body)
        .map_err(|err| ReceiveError::MalformedPayload(err.to_string()))?;

    let mut root = Map::new();
    for (key, value) in pairs {
        let segments = split_form_key(&key);
        insert_path(&mut root, &segments, value);
    }
    Ok(Value::Object(root))
}

fn split_form_key(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut rest = key;
    if let Some(open) = rest.find('[') {
        segments.push(rest[..open].to_string());
        rest = &rest[open..];
        while let Some(stripped) = rest.strip_prefix('[') {
            match stripped.find(']') {
                Some(close) => {
                    segments.push(stripped[..close].to_string());
                    rest = &stripped[close + 1..];
                }
                None => break,
            }
        }
    } else {
        segments.push(rest.to_string());
    }
    segments
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: String) {
    match path {
        [] => {}
        [leaf] => {
            map.insert(leaf.clone(), Value::String(value));
        }
        [head, tail @ ..] => {
            let entry = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(child) = entry {
                insert_path(child, tail, value);
            }
        }
    }
}
