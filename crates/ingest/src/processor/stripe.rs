//! Stripe event handlers.
//!
//! Stripe payloads embed the full object, so most handlers work off the
//! event body alone; subscription events carry only a customer id and go
//! through the REST client for the email. Amounts are integer minor units
//! divided by 100 on storage; currency codes are upper-cased.

use serde::Deserialize;
use serde_json::json;

use crate::error::IngestResult;
use crate::identity::{clean_name, CandidateLinkage};
use crate::model::{
    amount_from_minor_units, normalize_currency, BillingMethod, Cadence, EventType, NewEvent,
    SourceSystem,
};
use crate::queue::QueueMessage;

use super::{event_time_from_unix, EventProcessor};

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    created: Option<i64>,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Typed dispatch tag over `event.type`.
#[derive(Debug, PartialEq, Eq)]
enum StripeEventKind {
    PaymentIntentSucceeded,
    ChargeSucceeded,
    InvoicePaid,
    InvoiceFailed,
    SubscriptionUpserted,
    SubscriptionDeleted,
    SubscriptionPaused,
    CustomerUpserted,
    Unknown,
}

fn classify(event_type: &str) -> StripeEventKind {
    match event_type {
        "payment_intent.succeeded" => StripeEventKind::PaymentIntentSucceeded,
        "charge.succeeded" => StripeEventKind::ChargeSucceeded,
        "invoice.paid" | "invoice.payment_succeeded" => StripeEventKind::InvoicePaid,
        "invoice.payment_failed" => StripeEventKind::InvoiceFailed,
        "customer.subscription.created" | "customer.subscription.updated" => {
            StripeEventKind::SubscriptionUpserted
        }
        "customer.subscription.deleted" => StripeEventKind::SubscriptionDeleted,
        "customer.subscription.paused" => StripeEventKind::SubscriptionPaused,
        "customer.created" | "customer.updated" => StripeEventKind::CustomerUpserted,
        _ => StripeEventKind::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    amount: Option<i64>,
    currency: Option<String>,
    receipt_email: Option<String>,
    customer: Option<String>,
    customer_details: Option<CustomerDetails>,
}

#[derive(Debug, Deserialize)]
struct CustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Charge {
    id: String,
    amount: Option<i64>,
    currency: Option<String>,
    receipt_email: Option<String>,
    customer: Option<String>,
    billing_details: Option<BillingDetails>,
}

#[derive(Debug, Deserialize)]
struct BillingDetails {
    email: Option<String>,
    name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    id: String,
    amount_paid: Option<i64>,
    amount_due: Option<i64>,
    currency: Option<String>,
    customer: Option<String>,
    customer_email: Option<String>,
    customer_name: Option<String>,
    lines: Option<InvoiceLines>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLines {
    #[serde(default)]
    data: Vec<InvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct InvoiceLine {
    plan: Option<Plan>,
    price: Option<Price>,
}

#[derive(Debug, Deserialize)]
struct Plan {
    interval: Option<String>,
    nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Price {
    nickname: Option<String>,
    recurring: Option<Recurring>,
}

#[derive(Debug, Deserialize)]
struct Recurring {
    interval: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Subscription {
    id: String,
    customer: Option<String>,
    status: Option<String>,
    items: Option<SubscriptionItems>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItems {
    #[serde(default)]
    data: Vec<SubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionItem {
    plan: Option<Plan>,
    price: Option<Price>,
}

pub(super) async fn process(p: &EventProcessor, msg: &QueueMessage) -> IngestResult<()> {
    let event: StripeEvent = serde_json::from_value(msg.event.clone())?;

    match classify(&event.type_) {
        StripeEventKind::PaymentIntentSucceeded => handle_payment_intent(p, &event, msg).await,
        StripeEventKind::ChargeSucceeded => handle_charge(p, &event, msg).await,
        StripeEventKind::InvoicePaid => handle_invoice(p, &event, msg, true).await,
        StripeEventKind::InvoiceFailed => handle_invoice(p, &event, msg, false).await,
        StripeEventKind::SubscriptionUpserted => handle_subscription(p, &event).await,
        StripeEventKind::SubscriptionDeleted => handle_subscription_terminal(p, &event, false).await,
        StripeEventKind::SubscriptionPaused => handle_subscription_terminal(p, &event, true).await,
        StripeEventKind::CustomerUpserted => handle_customer(p, &event).await,
        StripeEventKind::Unknown => {
            tracing::info!(
                event_type = %event.type_,
                event_id = %event.id,
                "Received unhandled Stripe event type - no handler configured"
            );
            Ok(())
        }
    }
}

async fn handle_payment_intent(
    p: &EventProcessor,
    event: &StripeEvent,
    msg: &QueueMessage,
) -> IngestResult<()> {
    let intent: PaymentIntent = serde_json::from_value(event.data.object.clone())?;
    let email = intent
        .receipt_email
        .as_deref()
        .or(intent
            .customer_details
            .as_ref()
            .and_then(|d| d.email.as_deref()));
    let email = match email {
        Some(email) => email,
        None => {
            // Best-effort linkage: no email anywhere on the intent means
            // there is nobody to attach this to.
            tracing::warn!(
                payment_intent = %intent.id,
                "Stripe payment intent without email; skipping"
            );
            return Ok(());
        }
    };

    let candidate = match intent.customer.as_deref() {
        Some(customer_id) => CandidateLinkage::new(SourceSystem::Stripe, customer_id),
        None => CandidateLinkage::unlinked(SourceSystem::Stripe),
    };
    let supporter = p.identity.resolve(email, candidate).await?;

    let external_id = format!("stripe-pi-{}", intent.id);
    if p.already_processed(SourceSystem::Stripe, &external_id, "Stripe payment intent")
        .await?
    {
        return Ok(());
    }

    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Stripe,
            event_type: EventType::PaymentEvent,
            event_time: event_time_from_unix(event.created),
            external_id,
            amount: intent.amount.map(amount_from_minor_units),
            currency: intent.currency.as_deref().map(normalize_currency),
            metadata: json!({
                "payment_intent": intent.id,
                "status": "succeeded",
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    Ok(())
}

async fn handle_charge(
    p: &EventProcessor,
    event: &StripeEvent,
    msg: &QueueMessage,
) -> IngestResult<()> {
    let charge: Charge = serde_json::from_value(event.data.object.clone())?;
    let billing = charge.billing_details.as_ref();
    let email = billing
        .and_then(|b| b.email.as_deref())
        .or(charge.receipt_email.as_deref());
    let email = match email {
        Some(email) => email,
        None => {
            tracing::warn!(charge = %charge.id, "Stripe charge without email; skipping");
            return Ok(());
        }
    };

    let candidate = match charge.customer.as_deref() {
        Some(customer_id) => CandidateLinkage::new(SourceSystem::Stripe, customer_id),
        None => CandidateLinkage::unlinked(SourceSystem::Stripe),
    }
    .with_name(clean_name(billing.and_then(|b| b.name.clone())))
    .with_phone(billing.and_then(|b| b.phone.clone()));
    let supporter = p.identity.resolve(email, candidate).await?;

    let external_id = format!("stripe-charge-{}", charge.id);
    if p.already_processed(SourceSystem::Stripe, &external_id, "Stripe charge")
        .await?
    {
        return Ok(());
    }

    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Stripe,
            event_type: EventType::PaymentEvent,
            event_time: event_time_from_unix(event.created),
            external_id,
            amount: charge.amount.map(amount_from_minor_units),
            currency: charge.currency.as_deref().map(normalize_currency),
            metadata: json!({
                "charge": charge.id,
                "status": "succeeded",
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    Ok(())
}

async fn handle_invoice(
    p: &EventProcessor,
    event: &StripeEvent,
    msg: &QueueMessage,
    paid: bool,
) -> IngestResult<()> {
    let invoice: Invoice = serde_json::from_value(event.data.object.clone())?;
    let email = match invoice.customer_email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(invoice = %invoice.id, "Stripe invoice without customer email; skipping");
            return Ok(());
        }
    };

    let candidate = match invoice.customer.as_deref() {
        Some(customer_id) => CandidateLinkage::new(SourceSystem::Stripe, customer_id),
        None => CandidateLinkage::unlinked(SourceSystem::Stripe),
    }
    .with_name(clean_name(invoice.customer_name.clone()));
    let supporter = p.identity.resolve(email, candidate).await?;

    let (external_id, amount, status) = if paid {
        (
            format!("stripe-invoice-{}", invoice.id),
            invoice.amount_paid,
            "payment_succeeded",
        )
    } else {
        (
            format!("stripe-invoice-failed-{}", invoice.id),
            invoice.amount_due,
            "payment_failed",
        )
    };

    if p.already_processed(SourceSystem::Stripe, &external_id, "Stripe invoice")
        .await?
    {
        return Ok(());
    }

    let event_time = event_time_from_unix(event.created);
    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Stripe,
            event_type: EventType::MembershipEvent,
            event_time,
            external_id,
            amount: amount.map(amount_from_minor_units),
            currency: invoice.currency.as_deref().map(normalize_currency),
            metadata: json!({
                "invoice": invoice.id,
                "status": status,
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    if paid {
        let (cadence, tier) = invoice
            .lines
            .as_ref()
            .and_then(|lines| lines.data.first())
            .map(|line| line_plan(line.plan.as_ref(), line.price.as_ref()))
            .unwrap_or((None, None));
        p.membership
            .record_successful_payment(
                supporter.supporter_id,
                BillingMethod::Stripe,
                event_time,
                tier,
                cadence,
            )
            .await?;
    } else {
        p.membership
            .record_failed_payment(supporter.supporter_id)
            .await?;
    }

    Ok(())
}

fn line_plan(plan: Option<&Plan>, price: Option<&Price>) -> (Option<Cadence>, Option<String>) {
    let interval = plan
        .and_then(|p| p.interval.as_deref())
        .or(price.and_then(|p| p.recurring.as_ref()).and_then(|r| r.interval.as_deref()));
    let tier = plan
        .and_then(|p| p.nickname.clone())
        .or(price.and_then(|p| p.nickname.clone()));
    (interval.map(Cadence::from_interval_unit), tier)
}

/// Subscription payloads carry only the customer id; fetch the customer
/// for the email, then apply the membership signal. No event row is
/// written for subscription lifecycle changes.
async fn handle_subscription(p: &EventProcessor, event: &StripeEvent) -> IngestResult<()> {
    let subscription: Subscription = serde_json::from_value(event.data.object.clone())?;
    let supporter = match resolve_subscription_supporter(p, &subscription).await? {
        Some(supporter) => supporter,
        None => return Ok(()),
    };

    let (cadence, tier) = subscription
        .items
        .as_ref()
        .and_then(|items| items.data.first())
        .map(|item| line_plan(item.plan.as_ref(), item.price.as_ref()))
        .unwrap_or((None, None));

    match subscription.status.as_deref() {
        Some("canceled") => {
            p.membership.record_cancellation(supporter).await?;
        }
        Some("paused") => {
            p.membership.record_subscription_paused(supporter).await?;
        }
        _ => {
            p.membership
                .record_subscription_active(supporter, BillingMethod::Stripe, cadence, tier)
                .await?;
        }
    }

    Ok(())
}

async fn handle_subscription_terminal(
    p: &EventProcessor,
    event: &StripeEvent,
    paused: bool,
) -> IngestResult<()> {
    let subscription: Subscription = serde_json::from_value(event.data.object.clone())?;
    let supporter = match resolve_subscription_supporter(p, &subscription).await? {
        Some(supporter) => supporter,
        None => return Ok(()),
    };

    if paused {
        p.membership.record_subscription_paused(supporter).await?;
    } else {
        p.membership.record_cancellation(supporter).await?;
    }

    Ok(())
}

async fn resolve_subscription_supporter(
    p: &EventProcessor,
    subscription: &Subscription,
) -> IngestResult<Option<uuid::Uuid>> {
    let customer_id = match subscription.customer.as_deref() {
        Some(id) => id,
        None => {
            tracing::warn!(
                subscription = %subscription.id,
                "Stripe subscription without customer; skipping"
            );
            return Ok(None);
        }
    };
    let customer = match p.stripe.customer(customer_id).await? {
        Some(customer) => customer,
        None => {
            tracing::warn!(customer_id = customer_id, "Stripe customer not found; skipping");
            return Ok(None);
        }
    };
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = %customer.id, "Stripe customer without email; skipping");
            return Ok(None);
        }
    };

    let supporter = p
        .identity
        .resolve(
            email,
            CandidateLinkage::new(SourceSystem::Stripe, &customer.id)
                .with_name(clean_name(customer.name.clone()))
                .with_phone(customer.phone.clone()),
        )
        .await?;
    Ok(Some(supporter.supporter_id))
}

/// Customer-only webhooks run identity resolution and stop.
async fn handle_customer(p: &EventProcessor, event: &StripeEvent) -> IngestResult<()> {
    #[derive(Debug, Deserialize)]
    struct Customer {
        id: String,
        email: Option<String>,
        name: Option<String>,
        phone: Option<String>,
    }

    let customer: Customer = serde_json::from_value(event.data.object.clone())?;
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = %customer.id, "Stripe customer event without email; skipping");
            return Ok(());
        }
    };

    p.identity
        .resolve(
            email,
            CandidateLinkage::new(SourceSystem::Stripe, &customer.id)
                .with_name(clean_name(customer.name.clone()))
                .with_phone(customer.phone.clone()),
        )
        .await?;

    Ok(())
}
