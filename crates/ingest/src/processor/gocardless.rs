//! GoCardless event handlers.
//!
//! The receiver fans the webhook's `events[]` out, so each queue message
//! carries exactly one event: `{id, resource_type, action, links}`.
//! Handlers fetch detail from the REST client keyed by the ids in `links`
//! and tolerate missing linkage by logging and skipping.

use serde::Deserialize;
use serde_json::json;

use crate::clients::gocardless::GcCustomer;
use crate::error::IngestResult;
use crate::identity::{combine_name, CandidateLinkage};
use crate::model::{
    amount_from_minor_units, normalize_currency, BillingMethod, Cadence, EventType, NewEvent,
    SourceSystem,
};
use crate::queue::QueueMessage;

use super::{event_time_or_now, EventProcessor};

#[derive(Debug, Deserialize)]
struct GcWebhookEvent {
    id: String,
    resource_type: String,
    action: String,
    created_at: Option<String>,
    #[serde(default)]
    links: GcEventLinks,
}

#[derive(Debug, Default, Deserialize)]
struct GcEventLinks {
    payment: Option<String>,
    mandate: Option<String>,
    subscription: Option<String>,
    customer: Option<String>,
}

/// Typed dispatch tag over `(resource_type, action)`.
#[derive(Debug, PartialEq, Eq)]
enum GcEventKind {
    PaymentSettled,
    PaymentFailed,
    PaymentOther(String),
    MandateActive,
    MandateCancelled,
    SubscriptionActive,
    SubscriptionCancelled,
    SubscriptionPaused,
    Customer,
    Unknown,
}

fn classify(resource_type: &str, action: &str) -> GcEventKind {
    match (resource_type, action) {
        ("payments", "confirmed") | ("payments", "paid_out") => GcEventKind::PaymentSettled,
        ("payments", "failed") => GcEventKind::PaymentFailed,
        ("payments", other) => GcEventKind::PaymentOther(other.to_string()),
        ("mandates", "created") | ("mandates", "active") | ("mandates", "reinstated") => {
            GcEventKind::MandateActive
        }
        ("mandates", "cancelled") | ("mandates", "expired") | ("mandates", "failed") => {
            GcEventKind::MandateCancelled
        }
        ("subscriptions", "created")
        | ("subscriptions", "updated")
        | ("subscriptions", "resumed") => GcEventKind::SubscriptionActive,
        ("subscriptions", "cancelled") | ("subscriptions", "finished") => {
            GcEventKind::SubscriptionCancelled
        }
        ("subscriptions", "paused") => GcEventKind::SubscriptionPaused,
        ("customers", _) => GcEventKind::Customer,
        _ => GcEventKind::Unknown,
    }
}

pub(super) async fn process(p: &EventProcessor, msg: &QueueMessage) -> IngestResult<()> {
    let event: GcWebhookEvent = serde_json::from_value(msg.event.clone())?;

    match classify(&event.resource_type, &event.action) {
        GcEventKind::PaymentSettled => handle_payment(p, &event, msg, PaymentOutcome::Settled).await,
        GcEventKind::PaymentFailed => handle_payment(p, &event, msg, PaymentOutcome::Failed).await,
        GcEventKind::PaymentOther(action) => {
            handle_payment(p, &event, msg, PaymentOutcome::Other(action)).await
        }
        GcEventKind::MandateActive => handle_mandate(p, &event, msg, true).await,
        GcEventKind::MandateCancelled => handle_mandate(p, &event, msg, false).await,
        GcEventKind::SubscriptionActive => {
            handle_subscription(p, &event, msg, SubscriptionSignal::Active).await
        }
        GcEventKind::SubscriptionCancelled => {
            handle_subscription(p, &event, msg, SubscriptionSignal::Cancelled).await
        }
        GcEventKind::SubscriptionPaused => {
            handle_subscription(p, &event, msg, SubscriptionSignal::Paused).await
        }
        GcEventKind::Customer => handle_customer(p, &event).await,
        GcEventKind::Unknown => {
            tracing::warn!(
                resource_type = %event.resource_type,
                action = %event.action,
                event_id = %event.id,
                "Unhandled GoCardless event kind"
            );
            Ok(())
        }
    }
}

enum PaymentOutcome {
    Settled,
    Failed,
    Other(String),
}

async fn handle_payment(
    p: &EventProcessor,
    event: &GcWebhookEvent,
    msg: &QueueMessage,
    outcome: PaymentOutcome,
) -> IngestResult<()> {
    let payment_id = match event.links.payment.as_deref() {
        Some(id) => id,
        None => {
            tracing::warn!(event_id = %event.id, "GoCardless payment event without payment link; skipping");
            return Ok(());
        }
    };
    let payment = match p.gocardless.payment(payment_id).await? {
        Some(payment) => payment,
        None => {
            tracing::warn!(payment_id = payment_id, "GoCardless payment not found; skipping");
            return Ok(());
        }
    };
    let customer = match customer_via_mandate(p, payment.links.mandate.as_deref()).await? {
        Some(customer) => customer,
        None => return Ok(()),
    };
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = %customer.id, "GoCardless customer without email; skipping");
            return Ok(());
        }
    };

    let supporter = p
        .identity
        .resolve(
            email,
            CandidateLinkage::new(SourceSystem::Gocardless, &customer.id)
                .with_name(combine_name(
                    customer.given_name.as_deref(),
                    customer.family_name.as_deref(),
                ))
                .with_phone(customer.phone_number.clone()),
        )
        .await?;

    let (external_id, event_type, status) = match &outcome {
        PaymentOutcome::Settled => (
            format!("gocardless-payment-{}", payment.id),
            EventType::MembershipEvent,
            "confirmed".to_string(),
        ),
        // Failed payments are PaymentEvents; all other payment actions are
        // MembershipEvents.
        PaymentOutcome::Failed => (
            format!("gocardless-payment-failed-{}", payment.id),
            EventType::PaymentEvent,
            "failed".to_string(),
        ),
        PaymentOutcome::Other(action) => (
            format!("gocardless-payment-{}-{}", payment.id, action),
            EventType::MembershipEvent,
            action.clone(),
        ),
    };

    if p.already_processed(SourceSystem::Gocardless, &external_id, "GoCardless payment")
        .await?
    {
        return Ok(());
    }

    let event_time = event_time_or_now(event.created_at.as_deref());
    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Gocardless,
            event_type,
            event_time,
            external_id,
            amount: Some(amount_from_minor_units(payment.amount)),
            currency: Some(normalize_currency(&payment.currency)),
            metadata: json!({
                "payment_id": payment.id,
                "action": event.action,
                "status": status,
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    match outcome {
        PaymentOutcome::Settled => {
            p.membership
                .record_successful_payment(
                    supporter.supporter_id,
                    BillingMethod::Gocardless,
                    event_time,
                    None,
                    None,
                )
                .await?;
        }
        PaymentOutcome::Failed => {
            p.membership
                .record_failed_payment(supporter.supporter_id)
                .await?;
        }
        PaymentOutcome::Other(_) => {}
    }

    Ok(())
}

enum SubscriptionSignal {
    Active,
    Cancelled,
    Paused,
}

async fn handle_mandate(
    p: &EventProcessor,
    event: &GcWebhookEvent,
    msg: &QueueMessage,
    active: bool,
) -> IngestResult<()> {
    let customer = match customer_via_mandate(p, event.links.mandate.as_deref()).await? {
        Some(customer) => customer,
        None => return Ok(()),
    };
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = %customer.id, "GoCardless customer without email; skipping");
            return Ok(());
        }
    };

    let supporter = p
        .identity
        .resolve(
            email,
            CandidateLinkage::new(SourceSystem::Gocardless, &customer.id).with_name(
                combine_name(customer.given_name.as_deref(), customer.family_name.as_deref()),
            ),
        )
        .await?;

    let external_id = format!("gocardless-event-{}", event.id);
    if p.already_processed(SourceSystem::Gocardless, &external_id, "GoCardless mandate event")
        .await?
    {
        return Ok(());
    }

    let event_time = event_time_or_now(event.created_at.as_deref());
    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Gocardless,
            event_type: EventType::MembershipEvent,
            event_time,
            external_id,
            amount: None,
            currency: None,
            metadata: json!({
                "resource_type": "mandates",
                "action": event.action,
                "mandate": event.links.mandate,
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    if active {
        p.membership
            .record_subscription_active(
                supporter.supporter_id,
                BillingMethod::Gocardless,
                None,
                None,
            )
            .await?;
    } else {
        p.membership
            .record_cancellation(supporter.supporter_id)
            .await?;
    }

    Ok(())
}

async fn handle_subscription(
    p: &EventProcessor,
    event: &GcWebhookEvent,
    msg: &QueueMessage,
    signal: SubscriptionSignal,
) -> IngestResult<()> {
    let subscription_id = match event.links.subscription.as_deref() {
        Some(id) => id,
        None => {
            tracing::warn!(event_id = %event.id, "GoCardless subscription event without link; skipping");
            return Ok(());
        }
    };
    let subscription = match p.gocardless.subscription(subscription_id).await? {
        Some(subscription) => subscription,
        None => {
            tracing::warn!(
                subscription_id = subscription_id,
                "GoCardless subscription not found; skipping"
            );
            return Ok(());
        }
    };
    let customer = match customer_via_mandate(p, subscription.links.mandate.as_deref()).await? {
        Some(customer) => customer,
        None => return Ok(()),
    };
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = %customer.id, "GoCardless customer without email; skipping");
            return Ok(());
        }
    };

    let supporter = p
        .identity
        .resolve(
            email,
            CandidateLinkage::new(SourceSystem::Gocardless, &customer.id).with_name(
                combine_name(customer.given_name.as_deref(), customer.family_name.as_deref()),
            ),
        )
        .await?;

    let external_id = format!("gocardless-event-{}", event.id);
    if p.already_processed(
        SourceSystem::Gocardless,
        &external_id,
        "GoCardless subscription event",
    )
    .await?
    {
        return Ok(());
    }

    let cadence = subscription
        .interval_unit
        .as_deref()
        .map(Cadence::from_interval_unit);
    let event_time = event_time_or_now(event.created_at.as_deref());
    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Gocardless,
            event_type: EventType::MembershipEvent,
            event_time,
            external_id,
            amount: None,
            currency: None,
            metadata: json!({
                "resource_type": "subscriptions",
                "action": event.action,
                "subscription": subscription.id,
                "interval_unit": subscription.interval_unit,
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    match signal {
        SubscriptionSignal::Active => {
            p.membership
                .record_subscription_active(
                    supporter.supporter_id,
                    BillingMethod::Gocardless,
                    cadence,
                    subscription.name.clone(),
                )
                .await?;
        }
        SubscriptionSignal::Cancelled => {
            p.membership
                .record_cancellation(supporter.supporter_id)
                .await?;
        }
        SubscriptionSignal::Paused => {
            p.membership
                .record_subscription_paused(supporter.supporter_id)
                .await?;
        }
    }

    Ok(())
}

/// Customer-only webhooks run identity resolution and stop; no event row.
async fn handle_customer(p: &EventProcessor, event: &GcWebhookEvent) -> IngestResult<()> {
    let customer_id = match event.links.customer.as_deref() {
        Some(id) => id,
        None => {
            tracing::warn!(event_id = %event.id, "GoCardless customer event without link; skipping");
            return Ok(());
        }
    };
    let customer = match p.gocardless.customer(customer_id).await? {
        Some(customer) => customer,
        None => {
            tracing::warn!(customer_id = customer_id, "GoCardless customer not found; skipping");
            return Ok(());
        }
    };
    let email = match customer.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(customer_id = %customer.id, "GoCardless customer without email; skipping");
            return Ok(());
        }
    };

    p.identity
        .resolve(
            email,
            CandidateLinkage::new(SourceSystem::Gocardless, &customer.id)
                .with_name(combine_name(
                    customer.given_name.as_deref(),
                    customer.family_name.as_deref(),
                ))
                .with_phone(customer.phone_number.clone()),
        )
        .await?;

    Ok(())
}

/// Walk payment/subscription `links.mandate` -> mandate -> customer.
/// Any missing hop logs and yields `None`.
async fn customer_via_mandate(
    p: &EventProcessor,
    mandate_id: Option<&str>,
) -> IngestResult<Option<GcCustomer>> {
    let mandate_id = match mandate_id {
        Some(id) => id,
        None => {
            tracing::warn!("GoCardless resource without mandate link; skipping");
            return Ok(None);
        }
    };
    let mandate = match p.gocardless.mandate(mandate_id).await? {
        Some(mandate) => mandate,
        None => {
            tracing::warn!(mandate_id = mandate_id, "GoCardless mandate not found; skipping");
            return Ok(None);
        }
    };
    let customer_id = match mandate.links.customer.as_deref() {
        Some(id) => id,
        None => {
            tracing::warn!(mandate_id = %mandate.id, "GoCardless mandate without customer link; skipping");
            return Ok(None);
        }
    };
    match p.gocardless.customer(customer_id).await? {
        Some(customer) => Ok(Some(customer)),
        None => {
            tracing::warn!(customer_id = customer_id, "GoCardless customer not found; skipping");
            Ok(None)
        }
    }
}
