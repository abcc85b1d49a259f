//! Mailchimp event handlers.
//!
//! Payloads are `{type, data, fired_at}`. Subscribe/profile/unsubscribe
//! notifications only feed identity resolution; campaign link clicks
//! become `EmailClick` events.

use serde::Deserialize;
use serde_json::json;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::IngestResult;
use crate::identity::{combine_name, CandidateLinkage};
use crate::model::{EventType, NewEvent, SourceSystem};
use crate::queue::QueueMessage;

use super::EventProcessor;

#[derive(Debug, Deserialize)]
struct MailchimpEvent {
    #[serde(rename = "type")]
    type_: String,
    fired_at: Option<String>,
    #[serde(default)]
    data: MailchimpData,
}

#[derive(Debug, Default, Deserialize)]
struct MailchimpData {
    id: Option<String>,
    email: Option<String>,
    campaign_id: Option<String>,
    url: Option<String>,
    #[serde(default)]
    merges: MailchimpMerges,
}

#[derive(Debug, Default, Deserialize)]
struct MailchimpMerges {
    #[serde(rename = "FNAME")]
    first_name: Option<String>,
    #[serde(rename = "LNAME")]
    last_name: Option<String>,
    #[serde(rename = "PHONE")]
    phone: Option<String>,
}

/// Typed dispatch tag over the notification `type`.
#[derive(Debug, PartialEq, Eq)]
enum MailchimpKind {
    Profile,
    Click,
    Unknown,
}

fn classify(type_: &str) -> MailchimpKind {
    match type_ {
        "subscribe" | "unsubscribe" | "profile" => MailchimpKind::Profile,
        "click" => MailchimpKind::Click,
        _ => MailchimpKind::Unknown,
    }
}

/// Mailchimp stamps `fired_at` as `yyyy-mm-dd hh:mm:ss` (UTC).
fn fired_at_or_now(raw: Option<&str>) -> OffsetDateTime {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    raw.and_then(|value| PrimitiveDateTime::parse(value, &format).ok())
        .map(|dt| dt.assume_utc())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

pub(super) async fn process(p: &EventProcessor, msg: &QueueMessage) -> IngestResult<()> {
    let event: MailchimpEvent = serde_json::from_value(msg.event.clone())?;

    match classify(&event.type_) {
        MailchimpKind::Profile => handle_profile(p, &event).await,
        MailchimpKind::Click => handle_click(p, &event, msg).await,
        MailchimpKind::Unknown => {
            tracing::warn!(notification_type = %event.type_, "Unhandled Mailchimp notification type");
            Ok(())
        }
    }
}

/// Subscribe/unsubscribe/profile notifications run identity resolution
/// and stop.
async fn handle_profile(p: &EventProcessor, event: &MailchimpEvent) -> IngestResult<()> {
    let email = match event.data.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!(notification_type = %event.type_, "Mailchimp notification without email; skipping");
            return Ok(());
        }
    };

    let candidate = match event.data.id.as_deref() {
        Some(subscriber_id) => CandidateLinkage::new(SourceSystem::Mailchimp, subscriber_id),
        None => CandidateLinkage::unlinked(SourceSystem::Mailchimp),
    }
    .with_name(combine_name(
        event.data.merges.first_name.as_deref(),
        event.data.merges.last_name.as_deref(),
    ))
    .with_phone(event.data.merges.phone.clone());

    p.identity.resolve(email, candidate).await?;
    Ok(())
}

async fn handle_click(
    p: &EventProcessor,
    event: &MailchimpEvent,
    msg: &QueueMessage,
) -> IngestResult<()> {
    let email = match event.data.email.as_deref() {
        Some(email) => email,
        None => {
            tracing::warn!("Mailchimp click without email; skipping");
            return Ok(());
        }
    };

    // Repeated clicks on the same campaign by the same subscriber collapse
    // into one event.
    let external_id = match (event.data.campaign_id.as_deref(), event.data.id.as_deref()) {
        (Some(campaign_id), _) => {
            format!("mailchimp-click-{campaign_id}-{}", email.to_lowercase())
        }
        (None, Some(id)) => format!("mailchimp-click-{id}"),
        (None, None) => {
            tracing::warn!("Mailchimp click without campaign or id; skipping");
            return Ok(());
        }
    };

    let candidate = match event.data.id.as_deref() {
        Some(subscriber_id) => CandidateLinkage::new(SourceSystem::Mailchimp, subscriber_id),
        None => CandidateLinkage::unlinked(SourceSystem::Mailchimp),
    };
    let supporter = p.identity.resolve(email, candidate).await?;

    if p.already_processed(SourceSystem::Mailchimp, &external_id, "Mailchimp click")
        .await?
    {
        return Ok(());
    }

    p.repos
        .events
        .create(NewEvent {
            supporter_id: supporter.supporter_id,
            source_system: SourceSystem::Mailchimp,
            event_type: EventType::EmailClick,
            event_time: fired_at_or_now(event.fired_at.as_deref()),
            external_id,
            amount: None,
            currency: None,
            metadata: json!({
                "campaign_id": event.data.campaign_id,
                "url": event.data.url,
            }),
            raw_payload_ref: Some(msg.raw_payload_ref.clone()),
        })
        .await?;

    Ok(())
}
