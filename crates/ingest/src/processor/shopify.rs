//! Shopify event handlers.
//!
//! Queue messages carry `{topic, payload}`; order payloads embed the
//! customer, so no REST lookups are needed. Shopify sends decimal amounts
//! as strings (`total_price`), stored as-is after parsing.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::error::IngestResult;
use crate::identity::{combine_name, CandidateLinkage};
use crate::model::{normalize_currency, EventType, NewEvent, SourceSystem};
use crate::queue::QueueMessage;

use super::{event_time_or_now, EventProcessor};

#[derive(Debug, Deserialize)]
struct ShopifyQueueEvent {
    topic: String,
    payload: serde_json::Value,
}

/// Typed dispatch tag over the webhook topic.
#[derive(Debug, PartialEq, Eq)]
enum ShopifyTopic {
    Order,
    Customer,
    Unknown,
}

fn classify(topic: &str) -> ShopifyTopic {
    match topic {
        "orders/create" | "orders/updated" | "orders/paid" => ShopifyTopic::Order,
        "customers/create" | "customers/update" => ShopifyTopic::Customer,
        _ => ShopifyTopic::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct ShopifyOrder {
    id: i64,
    email: Option<String>,
    created_at: Option<String>,
    total_price: Option<String>,
    currency: Option<String>,
    financial_status: Option<String>,
    customer: Option<ShopifyCustomer>,
}

#[derive(Debug, Deserialize)]
struct ShopifyCustomer {
    id: Option<i64>,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
}

pub(super) async fn process(p: &EventProcessor, msg: &QueueMessage) -> IngestResult<()> {
    let event: ShopifyQueueEvent = serde_json::from_value(msg.event.clone())?;

    match classify(&event.topic) {
        ShopifyTopic::Order => handle_order(p, &event, msg).await,
        ShopifyTopic::Customer => handle_customer(p, &event).await,
        ShopifyTopic::Unknown => {
            tracing::warn!(topic = %event.topic, "Unhandled Shopify webhook topic");
            Ok(())
        }
    }
}

async fn handle_order(
    p: &EventProcessor,
    event: &ShopifyQueueEvent,
    msg: &QueueMessage,
) -> IngestResult<()> {
    let order: ShopifyOrder = serde_json::from_value(event.payload.clone())?;
    let customer = order.customer.as_ref();
    let email = order
        .email
        .as_deref()
        .or(customer.and_then(|c| c.email.as_deref()));
    let email = match email {
        Some(email) => email,
        None => {
            tracing::warn!(order_id = order.id, "Shopify order without email; skipping");
            return Ok(());
        }
    };

    let candidate = match customer.and_then(|c| c.id) {
        Some(customer_id) => {
            CandidateLinkage::new(SourceSystem::Shopify, customer_id.to_string())
        }
        None => CandidateLinkage::unlinked(SourceSystem::Shopify),
    }
    .with_name(combine_name(
        customer.and_then(|c| c.first_name.as_deref()),
        customer.and_then(|c| c.last_name.as_deref()),
    ))
    .with_phone(customer.and_then(|c| c.phone.clone()));
    let supporter = p.identity.resolve(email, candidate).await?;

    let external_id = format!("shopify-order-{}", order.id);
    if p.already_processed(SourceSystem::Shopify, &external_id, "Shopify order")
        .await?
    {
        return Ok(());
    }

    let amount = order
        .total_price
        .as_deref()
        .and_then(|price| price.parse::<Decimal>().ok());
    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Shopify,
            event_type: EventType::ShopOrder,
            event_time: event_time_or_now(order.created_at.as_deref()),
            external_id,
            amount,
            currency: order.currency.as_deref().map(normalize_currency),
            metadata: json!({
                "order_id": order.id,
                "topic": event.topic,
                "financial_status": order.financial_status,
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    Ok(())
}

/// Customer-only webhooks run identity resolution and stop.
async fn handle_customer(p: &EventProcessor, event: &ShopifyQueueEvent) -> IngestResult<()> {
    let customer: ShopifyCustomer = serde_json::from_value(event.payload.clone())?;
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = ?customer.id, "Shopify customer without email; skipping");
            return Ok(());
        }
    };

    let candidate = match customer.id {
        Some(customer_id) => {
            CandidateLinkage::new(SourceSystem::Shopify, customer_id.to_string())
        }
        None => CandidateLinkage::unlinked(SourceSystem::Shopify),
    }
    .with_name(combine_name(
        customer.first_name.as_deref(),
        customer.last_name.as_deref(),
    ))
    .with_phone(customer.phone.clone());

    p.identity.resolve(email, candidate).await?;
    Ok(())
}
