//! Membership state updater.
//!
//! A small state machine over `{Active, Past Due, Cancelled, Unknown}`,
//! driven only by payment/mandate/subscription signals:
//!
//! - successful payment   -> Active, `last_payment_date` updated
//! - failed payment       -> Past Due (skip when no membership exists yet)
//! - cancellation         -> Cancelled, from any prior state
//! - mandate/subscription active -> Active, cadence from the interval unit
//! - paused subscription  -> Past Due (closest existing status; there is
//!   no dedicated Paused state)

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::IngestResult;
use crate::model::{BillingMethod, Cadence, Membership, MembershipStatus, MembershipUpsert};
use crate::repo::MembershipRepository;

#[derive(Clone)]
pub struct MembershipUpdater {
    memberships: Arc<dyn MembershipRepository>,
}

impl MembershipUpdater {
    pub fn new(memberships: Arc<dyn MembershipRepository>) -> Self {
        Self { memberships }
    }

    /// Confirmed/paid-out/invoice-paid signal: upsert to Active and stamp
    /// the payment date. `tier`/`cadence` pass through as `None` unless the
    /// signal supplied them — the repository merges COALESCE-style so a
    /// known value is never downgraded.
    pub async fn record_successful_payment(
        &self,
        supporter_id: Uuid,
        billing_method: BillingMethod,
        paid_at: OffsetDateTime,
        tier: Option<String>,
        cadence: Option<Cadence>,
    ) -> IngestResult<Membership> {
        let membership = self
            .memberships
            .upsert(MembershipUpsert {
                supporter_id,
                tier,
                cadence,
                billing_method: Some(billing_method),
                status: MembershipStatus::Active,
                last_payment_date: Some(paid_at),
            })
            .await?;

        tracing::info!(
            supporter_id = %supporter_id,
            billing_method = billing_method.as_str(),
            "Membership marked active after successful payment"
        );
        Ok(membership)
    }

    /// Failed-payment signal: Active -> Past Due. Without an existing
    /// membership row there is nothing to update; log and skip.
    pub async fn record_failed_payment(&self, supporter_id: Uuid) -> IngestResult<()> {
        if self.memberships.mark_past_due(supporter_id).await? {
            tracing::info!(supporter_id = %supporter_id, "Membership marked past due");
        } else {
            tracing::warn!(
                supporter_id = %supporter_id,
                "Failed payment for supporter with no membership; skipping"
            );
        }
        Ok(())
    }

    /// Mandate/subscription cancellation: any state -> Cancelled.
    pub async fn record_cancellation(&self, supporter_id: Uuid) -> IngestResult<()> {
        self.memberships.cancel(supporter_id).await?;
        tracing::info!(supporter_id = %supporter_id, "Membership cancelled");
        Ok(())
    }

    /// Mandate/subscription created or updated while active.
    pub async fn record_subscription_active(
        &self,
        supporter_id: Uuid,
        billing_method: BillingMethod,
        cadence: Option<Cadence>,
        tier: Option<String>,
    ) -> IngestResult<Membership> {
        let membership = self
            .memberships
            .upsert(MembershipUpsert {
                supporter_id,
                tier,
                cadence,
                billing_method: Some(billing_method),
                status: MembershipStatus::Active,
                last_payment_date: None,
            })
            .await?;

        tracing::info!(
            supporter_id = %supporter_id,
            billing_method = billing_method.as_str(),
            cadence = ?cadence,
            "Membership marked active from subscription signal"
        );
        Ok(membership)
    }

    /// Paused subscription maps to Past Due.
    pub async fn record_subscription_paused(&self, supporter_id: Uuid) -> IngestResult<()> {
        if self.memberships.mark_past_due(supporter_id).await? {
            tracing::info!(
                supporter_id = %supporter_id,
                "Membership marked past due for paused subscription"
            );
        } else {
            tracing::warn!(
                supporter_id = %supporter_id,
                "Paused subscription for supporter with no membership; skipping"
            );
        }
        Ok(())
    }
}
