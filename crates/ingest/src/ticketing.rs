//! Future Ticketing sync.
//!
//! Future Ticketing has no webhook feed; the worker polls the private REST
//! API on a schedule and runs orders and stadium entries through the same
//! identity resolution and idempotency guard as webhook events. The poll
//! window overlaps between runs; the guard absorbs the duplicates.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;

use crate::clients::futureticketing::FutureTicketingApi;
use crate::error::IngestResult;
use crate::identity::{combine_name, CandidateLinkage, IdentityResolver};
use crate::model::{normalize_currency, EventType, NewEvent, SourceSystem};
use crate::processor::already_processed;
use crate::repo::{EventRepository, Repositories};

pub struct TicketingSync {
    ft: Arc<dyn FutureTicketingApi>,
    identity: IdentityResolver,
    events: Arc<dyn EventRepository>,
}

impl TicketingSync {
    pub fn new(ft: Arc<dyn FutureTicketingApi>, repos: &Repositories) -> Self {
        Self {
            ft,
            identity: IdentityResolver::new(repos.supporters.clone()),
            events: repos.events.clone(),
        }
    }

    /// Pull recent orders and record a `TicketPurchase` per new one.
    /// Returns the number of events written.
    pub async fn sync_orders(&self, since: OffsetDateTime) -> IngestResult<u32> {
        let orders = self.ft.orders_since(since).await?;
        let mut written = 0u32;

        for order in orders {
            let email = match order.email.as_deref() {
                Some(email) => email,
                None => {
                    tracing::warn!(order_id = %order.id, "Ticketing order without email; skipping");
                    continue;
                }
            };

            let candidate = match order.customer_id.as_deref() {
                Some(customer_id) => {
                    CandidateLinkage::new(SourceSystem::Futureticketing, customer_id)
                }
                None => CandidateLinkage::unlinked(SourceSystem::Futureticketing),
            }
            .with_name(combine_name(
                order.first_name.as_deref(),
                order.last_name.as_deref(),
            ))
            .with_phone(order.phone.clone());
            let supporter = self.identity.resolve(email, candidate).await?;

            let external_id = format!("futureticketing-order-{}", order.id);
            if already_processed(
                self.events.as_ref(),
                SourceSystem::Futureticketing,
                &external_id,
                "Ticketing order",
            )
            .await?
            {
                continue;
            }

            self.events
                .create(NewEvent {
                    supporter_id: supporter.supporter_id,
                    source_system: SourceSystem::Futureticketing,
                    event_type: EventType::TicketPurchase,
                    event_time: order.created_at,
                    external_id,
                    amount: order.total,
                    currency: order.currency.as_deref().map(normalize_currency),
                    metadata: json!({"order_id": order.id}),
                    raw_payload_ref: None,
                })
                .await?;
            written += 1;
        }

        Ok(written)
    }

    /// Pull recent gate scans and record a `StadiumEntry` per new one.
    pub async fn sync_entries(&self, since: OffsetDateTime) -> IngestResult<u32> {
        let entries = self.ft.entries_since(since).await?;
        let mut written = 0u32;

        for entry in entries {
            let email = match entry.email.as_deref() {
                Some(email) => email,
                None => {
                    tracing::warn!(entry_id = %entry.id, "Ticketing entry without email; skipping");
                    continue;
                }
            };

            let candidate = match entry.customer_id.as_deref() {
                Some(customer_id) => {
                    CandidateLinkage::new(SourceSystem::Futureticketing, customer_id)
                }
                None => CandidateLinkage::unlinked(SourceSystem::Futureticketing),
            };
            let supporter = self.identity.resolve(email, candidate).await?;

            let external_id = format!("futureticketing-entry-{}", entry.id);
            if already_processed(
                self.events.as_ref(),
                SourceSystem::Futureticketing,
                &external_id,
                "Ticketing entry",
            )
            .await?
            {
                continue;
            }

            self.events
                .create(NewEvent {
                    supporter_id: supporter.supporter_id,
                    source_system: SourceSystem::Futureticketing,
                    event_type: EventType::StadiumEntry,
                    event_time: entry.scanned_at,
                    external_id,
                    amount: None,
                    currency: None,
                    metadata: json!({"entry_id": entry.id, "gate": entry.gate}),
                    raw_payload_ref: None,
                })
                .await?;
            written += 1;
        }

        Ok(written)
    }
}
