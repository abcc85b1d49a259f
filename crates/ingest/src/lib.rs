// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Supporter 360 Ingest Pipeline
//!
//! Takes raw provider webhooks (Shopify, Stripe, GoCardless, Mailchimp)
//! plus the polled Future Ticketing feed, verifies them, resolves a
//! canonical supporter identity, and applies idempotent event/membership
//! mutations.
//!
//! ## Components
//!
//! - **Signature verifiers**: per-provider HMAC schemes, constant-time
//! - **Webhook receivers**: verify, persist the raw payload, enqueue
//! - **Event queue**: Postgres-backed, at-least-once, dead-letters after
//!   repeated failures
//! - **Event processors**: per-provider dispatch into identity resolution,
//!   the idempotency guard and the membership state machine
//! - **Provider clients**: REST lookups with uniform retry/backoff

pub mod clients;
pub mod config;
pub mod error;
pub mod identity;
pub mod membership;
pub mod model;
pub mod payload_store;
pub mod processor;
pub mod queue;
pub mod receiver;
pub mod repo;
pub mod signature;
pub mod ticketing;

#[cfg(test)]
mod pipeline_tests;
#[cfg(test)]
pub(crate) mod testutil;

// Config
pub use config::IngestConfig;

// Error
pub use error::{ApiErrorKind, IngestError, IngestResult, ProviderApiError};

// Identity
pub use identity::{CandidateLinkage, IdentityResolver};

// Membership
pub use membership::MembershipUpdater;

// Processor
pub use processor::EventProcessor;

// Queue
pub use queue::{ClaimedMessage, EventQueue, QueueMessage, QueueSink, MAX_ATTEMPTS};

// Receiver
pub use receiver::{Receipt, ReceiveError, WebhookReceiver};

// Repositories
pub use repo::{
    EventRepository, MembershipRepository, PgEventRepository, PgMembershipRepository,
    PgSupporterRepository, Repositories, SupporterRepository,
};

// Payload store
pub use payload_store::{payload_key, PayloadStore, PgPayloadStore};

// Ticketing sync
pub use ticketing::TicketingSync;

use std::sync::Arc;

use sqlx::PgPool;

use crate::clients::futureticketing::FutureTicketingClient;
use crate::clients::gocardless::GoCardlessClient;
use crate::clients::stripe::StripeClient;

/// Everything the API server and worker need, wired against Postgres and
/// the live provider APIs.
pub struct IngestService {
    pub receiver: Arc<WebhookReceiver>,
    pub processor: Arc<EventProcessor>,
    pub ticketing: Arc<TicketingSync>,
    pub queue: EventQueue,
    pub payloads: Arc<PgPayloadStore>,
}

impl IngestService {
    /// Create the service from environment variables.
    pub fn from_env(pool: PgPool) -> IngestResult<Self> {
        let config = IngestConfig::from_env()?;
        Ok(Self::new(config, pool))
    }

    pub fn new(config: IngestConfig, pool: PgPool) -> Self {
        let repos = Repositories::postgres(pool.clone());
        let queue = EventQueue::new(pool.clone());
        let payloads = Arc::new(PgPayloadStore::new(pool));

        let gocardless = Arc::new(GoCardlessClient::new(config.gocardless_access_token.clone()));
        let stripe = Arc::new(StripeClient::new(config.stripe_api_key.clone()));
        let futureticketing = Arc::new(FutureTicketingClient::new(
            config.future_ticketing_api_key.clone(),
            config.future_ticketing_private_key.clone(),
            config.future_ticketing_base_url.clone(),
        ));

        let receiver = Arc::new(WebhookReceiver::new(
            config,
            payloads.clone(),
            Arc::new(queue.clone()),
        ));
        let processor = Arc::new(EventProcessor::new(repos.clone(), gocardless, stripe));
        let ticketing = Arc::new(TicketingSync::new(futureticketing, &repos));

        Self {
            receiver,
            processor,
            ticketing,
            queue,
            payloads,
        }
    }
}
