//! Persistence boundary for supporters, events and memberships.
//!
//! Processors talk to these traits; the `Pg*` implementations are the only
//! SQL in the pipeline. Unique constraints (`(source_system, external_id)`
//! on events, `supporter_id` on memberships) are the concurrency-safety
//! mechanism — there is no application-level locking.

mod events;
mod memberships;
mod supporters;

pub use events::PgEventRepository;
pub use memberships::PgMembershipRepository;
pub use supporters::PgSupporterRepository;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::IngestResult;
use crate::model::{
    Event, LinkedIds, Membership, MembershipUpsert, NewEvent, NewSupporter, SourceSystem,
    Supporter,
};

#[async_trait]
pub trait SupporterRepository: Send + Sync {
    /// All supporters with this primary email, oldest first
    /// (`created_at ASC, supporter_id ASC` — the shared-email tie-break
    /// depends on this ordering).
    async fn find_by_email(&self, email: &str) -> IngestResult<Vec<Supporter>>;

    async fn create(&self, new: NewSupporter) -> IngestResult<Supporter>;

    /// Fill in previously-null name/phone; never overwrites known values.
    async fn update_contact(
        &self,
        supporter_id: Uuid,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> IngestResult<()>;

    async fn update_linked_ids(
        &self,
        supporter_id: Uuid,
        linked_ids: &LinkedIds,
    ) -> IngestResult<()>;

    async fn add_email_alias(
        &self,
        supporter_id: Uuid,
        email: &str,
        is_primary: bool,
    ) -> IngestResult<()>;

    async fn set_shared_email_flag(&self, supporter_id: Uuid) -> IngestResult<()>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn find_by_external_id(
        &self,
        source_system: SourceSystem,
        external_id: &str,
    ) -> IngestResult<Option<Event>>;

    /// Insert an event. Carries `ON CONFLICT (source_system, external_id)
    /// DO UPDATE` as the second line of defense behind the idempotency
    /// guard's check: redelivery refreshes metadata/raw_payload_ref on the
    /// existing row instead of failing or duplicating.
    async fn create(&self, new: NewEvent) -> IngestResult<Event>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn find_by_supporter_id(&self, supporter_id: Uuid) -> IngestResult<Option<Membership>>;

    /// Upsert keyed on `supporter_id`. `tier`/`cadence`/`billing_method`
    /// merge COALESCE-style: a `None` never downgrades a known value.
    async fn upsert(&self, upsert: MembershipUpsert) -> IngestResult<Membership>;

    async fn update_last_payment_date(
        &self,
        supporter_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> IngestResult<()>;

    /// Returns false when no membership row exists.
    async fn mark_active(&self, supporter_id: Uuid, paid_at: OffsetDateTime)
        -> IngestResult<bool>;

    /// Returns false when no membership row exists.
    async fn mark_past_due(&self, supporter_id: Uuid) -> IngestResult<bool>;

    /// Cancellation converges from any prior state, creating the row if the
    /// first signal we ever see for a supporter is a cancellation.
    async fn cancel(&self, supporter_id: Uuid) -> IngestResult<()>;
}

/// Bundle of repository handles threaded through the processors.
#[derive(Clone)]
pub struct Repositories {
    pub supporters: Arc<dyn SupporterRepository>,
    pub events: Arc<dyn EventRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            supporters: Arc::new(PgSupporterRepository::new(pool.clone())),
            events: Arc::new(PgEventRepository::new(pool.clone())),
            memberships: Arc::new(PgMembershipRepository::new(pool)),
        }
    }
}
