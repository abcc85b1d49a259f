//! Postgres membership repository.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::model::{Membership, MembershipUpsert};

use super::MembershipRepository;

type MembershipRow = (
    Uuid,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<OffsetDateTime>,
    OffsetDateTime,
    OffsetDateTime,
);

const MEMBERSHIP_COLUMNS: &str = "supporter_id, tier, cadence, billing_method, status, \
     last_payment_date, created_at, updated_at";

fn row_to_membership(row: MembershipRow) -> IngestResult<Membership> {
    let (supporter_id, tier, cadence, billing_method, status, last_payment_date, created_at, updated_at) =
        row;

    Ok(Membership {
        supporter_id,
        tier,
        cadence: cadence
            .map(|c| c.parse().map_err(IngestError::Internal))
            .transpose()?,
        billing_method: billing_method
            .map(|m| m.parse().map_err(IngestError::Internal))
            .transpose()?,
        status: status.parse().map_err(IngestError::Internal)?,
        last_payment_date,
        created_at,
        updated_at,
    })
}

pub struct PgMembershipRepository {
    pool: PgPool,
}

impl PgMembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PgMembershipRepository {
    async fn find_by_supporter_id(&self, supporter_id: Uuid) -> IngestResult<Option<Membership>> {
        let row: Option<MembershipRow> = sqlx::query_as(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE supporter_id = $1"
        ))
        .bind(supporter_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_membership).transpose()
    }

    async fn upsert(&self, upsert: MembershipUpsert) -> IngestResult<Membership> {
        let row: MembershipRow = sqlx::query_as(&format!(
            "INSERT INTO memberships \
                 (supporter_id, tier, cadence, billing_method, status, last_payment_date) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (supporter_id) DO UPDATE SET \
                 tier = COALESCE(EXCLUDED.tier, memberships.tier), \
                 cadence = COALESCE(EXCLUDED.cadence, memberships.cadence), \
                 billing_method = COALESCE(EXCLUDED.billing_method, memberships.billing_method), \
                 status = EXCLUDED.status, \
                 last_payment_date = COALESCE(EXCLUDED.last_payment_date, memberships.last_payment_date), \
                 updated_at = NOW() \
             RETURNING {MEMBERSHIP_COLUMNS}"
        ))
        .bind(upsert.supporter_id)
        .bind(upsert.tier.as_deref())
        .bind(upsert.cadence.map(|c| c.as_str()))
        .bind(upsert.billing_method.map(|m| m.as_str()))
        .bind(upsert.status.as_str())
        .bind(upsert.last_payment_date)
        .fetch_one(&self.pool)
        .await?;

        row_to_membership(row)
    }

    async fn update_last_payment_date(
        &self,
        supporter_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> IngestResult<()> {
        sqlx::query(
            "UPDATE memberships SET last_payment_date = $2, updated_at = NOW() \
             WHERE supporter_id = $1",
        )
        .bind(supporter_id)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_active(
        &self,
        supporter_id: Uuid,
        paid_at: OffsetDateTime,
    ) -> IngestResult<bool> {
        let result = sqlx::query(
            "UPDATE memberships \
             SET status = 'Active', last_payment_date = $2, updated_at = NOW() \
             WHERE supporter_id = $1",
        )
        .bind(supporter_id)
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_past_due(&self, supporter_id: Uuid) -> IngestResult<bool> {
        let result = sqlx::query(
            "UPDATE memberships SET status = 'Past Due', updated_at = NOW() \
             WHERE supporter_id = $1",
        )
        .bind(supporter_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, supporter_id: Uuid) -> IngestResult<()> {
        sqlx::query(
            "INSERT INTO memberships (supporter_id, status) VALUES ($1, 'Cancelled') \
             ON CONFLICT (supporter_id) DO UPDATE SET \
                 status = 'Cancelled', updated_at = NOW()",
        )
        .bind(supporter_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
