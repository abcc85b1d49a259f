//! Per-provider event processors.
//!
//! Each queue message is handled independently: dispatch on the provider's
//! event tag, resolve the supporter, run the idempotency guard, write the
//! event, and apply any membership signal. Data-quality gaps (missing
//! email, missing links) log a warning and skip; real failures propagate
//! out of [`EventProcessor::process_message`] so the queue layer
//! redelivers and eventually dead-letters the message.

mod gocardless;
mod mailchimp;
mod shopify;
mod stripe;

use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::clients::gocardless::GoCardlessApi;
use crate::clients::stripe::StripeApi;
use crate::error::IngestResult;
use crate::identity::IdentityResolver;
use crate::membership::MembershipUpdater;
use crate::model::SourceSystem;
use crate::queue::QueueMessage;
use crate::repo::Repositories;

pub struct EventProcessor {
    pub(crate) repos: Repositories,
    pub(crate) identity: IdentityResolver,
    pub(crate) membership: MembershipUpdater,
    pub(crate) gocardless: Arc<dyn GoCardlessApi>,
    pub(crate) stripe: Arc<dyn StripeApi>,
}

impl EventProcessor {
    pub fn new(
        repos: Repositories,
        gocardless: Arc<dyn GoCardlessApi>,
        stripe: Arc<dyn StripeApi>,
    ) -> Self {
        let identity = IdentityResolver::new(repos.supporters.clone());
        let membership = MembershipUpdater::new(repos.memberships.clone());
        Self {
            repos,
            identity,
            membership,
            gocardless,
            stripe,
        }
    }

    /// Process one dequeued webhook message.
    ///
    /// Errors are logged here and returned to the caller; swallowing them
    /// would defeat the queue's redelivery/dead-letter mechanism.
    pub async fn process_message(
        &self,
        provider: SourceSystem,
        msg: &QueueMessage,
    ) -> IngestResult<()> {
        let result = match provider {
            SourceSystem::Shopify => shopify::process(self, msg).await,
            SourceSystem::Stripe => stripe::process(self, msg).await,
            SourceSystem::Gocardless => gocardless::process(self, msg).await,
            SourceSystem::Mailchimp => mailchimp::process(self, msg).await,
            SourceSystem::Futureticketing => {
                tracing::warn!(
                    correlation_id = %msg.correlation_id,
                    "Future Ticketing events arrive via the sync job, not the webhook queue"
                );
                Ok(())
            }
        };

        if let Err(err) = &result {
            tracing::error!(
                provider = %provider,
                correlation_id = %msg.correlation_id,
                error = %err,
                "Event processing failed; message will be redelivered"
            );
        }
        result
    }

    pub(crate) async fn already_processed(
        &self,
        source: SourceSystem,
        external_id: &str,
        kind: &str,
    ) -> IngestResult<bool> {
        already_processed(self.repos.events.as_ref(), source, external_id, kind).await
    }
}

/// Idempotency guard: has an equivalent external event already been
/// recorded? The event insert itself also upserts on
/// `(source_system, external_id)` to cover the race between this check and
/// the write.
pub(crate) async fn already_processed(
    events: &dyn crate::repo::EventRepository,
    source: SourceSystem,
    external_id: &str,
    kind: &str,
) -> IngestResult<bool> {
    if events
        .find_by_external_id(source, external_id)
        .await?
        .is_some()
    {
        tracing::info!(external_id = external_id, "{kind} already processed");
        return Ok(true);
    }
    Ok(false)
}

/// Parse a provider RFC 3339 timestamp, falling back to now.
pub(crate) fn event_time_or_now(raw: Option<&str>) -> OffsetDateTime {
    raw.and_then(|value| OffsetDateTime::parse(value, &Rfc3339).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

/// Event time from a unix timestamp, falling back to now.
pub(crate) fn event_time_from_unix(timestamp: Option<i64>) -> OffsetDateTime {
    timestamp
        .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}
