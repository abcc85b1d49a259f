//! In-memory fakes behind the repository/client traits, shared by the
//! unit and pipeline tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::clients::futureticketing::{FtEntry, FtOrder, FutureTicketingApi};
use crate::clients::gocardless::{GcCustomer, GcMandate, GcPayment, GcSubscription, GoCardlessApi};
use crate::clients::stripe::{StripeApi, StripeCustomer};
use crate::config::IngestConfig;
use crate::error::{IngestResult, ProviderApiError};
use crate::model::{
    Event, LinkedIds, Membership, MembershipUpsert, NewEvent, NewSupporter, SourceSystem,
    Supporter, SupporterFlags, SupporterType, TypeSource,
};
use crate::payload_store::PayloadStore;
use crate::queue::{QueueMessage, QueueSink};
use crate::repo::{EventRepository, MembershipRepository, SupporterRepository};

pub(crate) fn test_config() -> IngestConfig {
    IngestConfig {
        shopify_webhook_secret: "shopify-secret".into(),
        stripe_webhook_secret: "stripe-secret".into(),
        gocardless_webhook_secret: "gocardless-secret".into(),
        stripe_api_key: "sk_test".into(),
        gocardless_access_token: "gc_token".into(),
        future_ticketing_api_key: "ft_key".into(),
        future_ticketing_private_key: "ft_private".into(),
        future_ticketing_base_url: "http://localhost:0".into(),
    }
}

fn seq_time(seq: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000 + seq).unwrap()
}

#[derive(Default)]
pub(crate) struct InMemorySupporterRepository {
    supporters: Mutex<Vec<Supporter>>,
    aliases: Mutex<Vec<(Uuid, String, bool)>>,
    seq: AtomicI64,
}

impl InMemorySupporterRepository {
    pub(crate) fn seed(&self, email: &str, name: Option<&str>) -> Uuid {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let supporter_id = Uuid::new_v4();
        self.supporters.lock().unwrap().push(Supporter {
            supporter_id,
            name: name.map(String::from),
            primary_email: Some(email.to_string()),
            phone: None,
            supporter_type: SupporterType::Unknown,
            supporter_type_source: TypeSource::Auto,
            linked_ids: LinkedIds::new(),
            flags: SupporterFlags::default(),
            created_at: seq_time(seq),
            updated_at: seq_time(seq),
        });
        supporter_id
    }

    pub(crate) fn get(&self, supporter_id: Uuid) -> Supporter {
        self.supporters
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.supporter_id == supporter_id)
            .cloned()
            .expect("supporter not found")
    }

    pub(crate) fn all(&self) -> Vec<Supporter> {
        self.supporters.lock().unwrap().clone()
    }

    pub(crate) fn flags_of(&self, supporter_id: Uuid) -> SupporterFlags {
        self.get(supporter_id).flags
    }

    pub(crate) fn aliases_for(&self, supporter_id: Uuid) -> Vec<String> {
        self.aliases
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == supporter_id)
            .map(|(_, email, _)| email.clone())
            .collect()
    }
}

#[async_trait]
impl SupporterRepository for InMemorySupporterRepository {
    async fn find_by_email(&self, email: &str) -> IngestResult<Vec<Supporter>> {
        let mut matches: Vec<Supporter> = self
            .supporters
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.primary_email.as_deref() == Some(email))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            (a.created_at, a.supporter_id).cmp(&(b.created_at, b.supporter_id))
        });
        Ok(matches)
    }

    async fn create(&self, new: NewSupporter) -> IngestResult<Supporter> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let supporter = Supporter {
            supporter_id: Uuid::new_v4(),
            name: new.name,
            primary_email: new.primary_email,
            phone: new.phone,
            supporter_type: SupporterType::Unknown,
            supporter_type_source: TypeSource::Auto,
            linked_ids: new.linked_ids,
            flags: SupporterFlags::default(),
            created_at: seq_time(seq),
            updated_at: seq_time(seq),
        };
        self.supporters.lock().unwrap().push(supporter.clone());
        Ok(supporter)
    }

    async fn update_contact(
        &self,
        supporter_id: Uuid,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> IngestResult<()> {
        let mut supporters = self.supporters.lock().unwrap();
        if let Some(supporter) = supporters.iter_mut().find(|s| s.supporter_id == supporter_id) {
            if supporter.name.is_none() {
                supporter.name = name.map(String::from);
            }
            if supporter.phone.is_none() {
                supporter.phone = phone.map(String::from);
            }
        }
        Ok(())
    }

    async fn update_linked_ids(
        &self,
        supporter_id: Uuid,
        linked_ids: &LinkedIds,
    ) -> IngestResult<()> {
        let mut supporters = self.supporters.lock().unwrap();
        if let Some(supporter) = supporters.iter_mut().find(|s| s.supporter_id == supporter_id) {
            supporter.linked_ids = linked_ids.clone();
        }
        Ok(())
    }

    async fn add_email_alias(
        &self,
        supporter_id: Uuid,
        email: &str,
        is_primary: bool,
    ) -> IngestResult<()> {
        self.aliases
            .lock()
            .unwrap()
            .push((supporter_id, email.to_string(), is_primary));
        Ok(())
    }

    async fn set_shared_email_flag(&self, supporter_id: Uuid) -> IngestResult<()> {
        let mut supporters = self.supporters.lock().unwrap();
        if let Some(supporter) = supporters.iter_mut().find(|s| s.supporter_id == supporter_id) {
            supporter.flags.shared_email = true;
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryEventRepository {
    events: Mutex<Vec<Event>>,
    create_calls: AtomicUsize,
}

impl InMemoryEventRepository {
    /// Number of `create` invocations, including upsert-refreshes. The
    /// idempotency guard should keep redeliveries from reaching `create`
    /// at all.
    pub(crate) fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn find_by_external_id(
        &self,
        source_system: SourceSystem,
        external_id: &str,
    ) -> IngestResult<Option<Event>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.source_system == source_system && e.external_id == external_id)
            .cloned())
    }

    async fn create(&self, new: NewEvent) -> IngestResult<Event> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut events = self.events.lock().unwrap();
        if let Some(existing) = events
            .iter_mut()
            .find(|e| e.source_system == new.source_system && e.external_id == new.external_id)
        {
            existing.metadata = new.metadata;
            if new.raw_payload_ref.is_some() {
                existing.raw_payload_ref = new.raw_payload_ref;
            }
            return Ok(existing.clone());
        }

        let event = Event {
            event_id: Uuid::new_v4(),
            supporter_id: new.supporter_id,
            source_system: new.source_system,
            event_type: new.event_type,
            event_time: new.event_time,
            external_id: new.external_id,
            amount: new.amount,
            currency: new.currency,
            metadata: new.metadata,
            raw_payload_ref: new.raw_payload_ref,
            created_at: OffsetDateTime::now_utc(),
        };
        events.push(event.clone());
        Ok(event)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryMembershipRepository {
    rows: Mutex<HashMap<Uuid, Membership>>,
}

impl InMemoryMembershipRepository {
    pub(crate) fn get(&self, supporter_id: Uuid) -> Option<Membership> {
        self.rows.lock().unwrap().get(&supporter_id).cloned()
    }

    pub(crate) fn status_of(&self, supporter_id: Uuid) -> Option<crate::model::MembershipStatus> {
        self.get(supporter_id).map(|m| m.status)
    }
}

#[async_trait]
impl MembershipRepository for InMemoryMembershipRepository {
    async fn find_by_supporter_id(&self, supporter_id: Uuid) -> IngestResult<Option<Membership>> {
        Ok(self.get(supporter_id))
    }

    async fn upsert(&self, upsert: MembershipUpsert) -> IngestResult<Membership> {
        let mut rows = self.rows.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let membership = match rows.get(&upsert.supporter_id) {
            Some(existing) => Membership {
                supporter_id: upsert.supporter_id,
                tier: upsert.tier.or(existing.tier.clone()),
                cadence: upsert.cadence.or(existing.cadence),
                billing_method: upsert.billing_method.or(existing.billing_method),
                status: upsert.status,
                last_payment_date: upsert.last_payment_date.or(existing.last_payment_date),
                created_at: existing.created_at,
                updated_at: now,
            },
            None => Membership {
                supporter_id: upsert.supporter_id,
                tier: upsert.tier,
                cadence: upsert.cadence,
                billing_method: upsert.billing_method,
                status: upsert.status,
                last_payment_date: upsert.last_payment_date,
                created_at: now,
                updated_at: now,
            },
        };
        rows.insert(upsert.supporter_id, membership.clone());
        Ok(membership)
    }

    async fn update_last_payment_date(
        &self,
        supporter_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> IngestResult<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&supporter_id) {
            row.last_payment_date = Some(paid_at);
        }
        Ok(())
    }

    async fn mark_active(
        &self,
        supporter_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> IngestResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&supporter_id) {
            Some(row) => {
                row.status = crate::model::MembershipStatus::Active;
                row.last_payment_date = Some(paid_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_past_due(&self, supporter_id: Uuid) -> IngestResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&supporter_id) {
            Some(row) => {
                row.status = crate::model::MembershipStatus::PastDue;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn cancel(&self, supporter_id: Uuid) -> IngestResult<()> {
        let mut rows = self.rows.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        rows.entry(supporter_id)
            .and_modify(|row| row.status = crate::model::MembershipStatus::Cancelled)
            .or_insert_with(|| Membership {
                supporter_id,
                tier: None,
                cadence: None,
                billing_method: None,
                status: crate::model::MembershipStatus::Cancelled,
                last_payment_date: None,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryPayloadStore {
    blobs: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryPayloadStore {
    pub(crate) fn get_sync(&self, key: &str) -> Option<serde_json::Value> {
        self.blobs.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl PayloadStore for InMemoryPayloadStore {
    async fn put(&self, key: &str, body: &serde_json::Value) -> IngestResult<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), body.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> IngestResult<Option<serde_json::Value>> {
        Ok(self.get_sync(key))
    }
}

#[derive(Default)]
pub(crate) struct RecordingQueueSink {
    messages: Mutex<Vec<(SourceSystem, QueueMessage)>>,
    next_id: AtomicI64,
}

impl RecordingQueueSink {
    pub(crate) fn messages(&self) -> Vec<(SourceSystem, QueueMessage)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueSink for RecordingQueueSink {
    async fn enqueue(&self, provider: SourceSystem, message: &QueueMessage) -> IngestResult<i64> {
        self.messages
            .lock()
            .unwrap()
            .push((provider, message.clone()));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[derive(Default)]
pub(crate) struct FakeGoCardless {
    payments: Mutex<HashMap<String, GcPayment>>,
    mandates: Mutex<HashMap<String, GcMandate>>,
    subscriptions: Mutex<HashMap<String, GcSubscription>>,
    customers: Mutex<HashMap<String, GcCustomer>>,
}

impl FakeGoCardless {
    pub(crate) fn add_payment(&self, payment: GcPayment) {
        self.payments
            .lock()
            .unwrap()
            .insert(payment.id.clone(), payment);
    }

    pub(crate) fn add_mandate(&self, mandate: GcMandate) {
        self.mandates
            .lock()
            .unwrap()
            .insert(mandate.id.clone(), mandate);
    }

    pub(crate) fn add_subscription(&self, subscription: GcSubscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
    }

    pub(crate) fn add_customer(&self, customer: GcCustomer) {
        self.customers
            .lock()
            .unwrap()
            .insert(customer.id.clone(), customer);
    }
}

#[async_trait]
impl GoCardlessApi for FakeGoCardless {
    async fn payment(&self, id: &str) -> Result<Option<GcPayment>, ProviderApiError> {
        Ok(self.payments.lock().unwrap().get(id).cloned())
    }

    async fn mandate(&self, id: &str) -> Result<Option<GcMandate>, ProviderApiError> {
        Ok(self.mandates.lock().unwrap().get(id).cloned())
    }

    async fn subscription(&self, id: &str) -> Result<Option<GcSubscription>, ProviderApiError> {
        Ok(self.subscriptions.lock().unwrap().get(id).cloned())
    }

    async fn customer(&self, id: &str) -> Result<Option<GcCustomer>, ProviderApiError> {
        Ok(self.customers.lock().unwrap().get(id).cloned())
    }
}

#[derive(Default)]
pub(crate) struct FakeStripe {
    customers: Mutex<HashMap<String, StripeCustomer>>,
}

impl FakeStripe {
    pub(crate) fn add_customer(&self, customer: StripeCustomer) {
        self.customers
            .lock()
            .unwrap()
            .insert(customer.id.clone(), customer);
    }
}

#[async_trait]
impl StripeApi for FakeStripe {
    async fn customer(&self, id: &str) -> Result<Option<StripeCustomer>, ProviderApiError> {
        Ok(self.customers.lock().unwrap().get(id).cloned())
    }
}

#[derive(Default)]
pub(crate) struct FakeFutureTicketing {
    orders: Mutex<Vec<FtOrder>>,
    entries: Mutex<Vec<FtEntry>>,
}

impl FakeFutureTicketing {
    pub(crate) fn add_order(&self, order: FtOrder) {
        self.orders.lock().unwrap().push(order);
    }

    pub(crate) fn add_entry(&self, entry: FtEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl FutureTicketingApi for FakeFutureTicketing {
    async fn orders_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<FtOrder>, ProviderApiError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.created_at >= since)
            .cloned()
            .collect())
    }

    async fn entries_since(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<FtEntry>, ProviderApiError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.scanned_at >= since)
            .cloned()
            .collect())
    }
}
