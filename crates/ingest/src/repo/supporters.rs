//! Postgres supporter repository.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::model::{LinkedIds, NewSupporter, Supporter, SupporterFlags};

use super::SupporterRepository;

type SupporterRow = (
    Uuid,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    serde_json::Value,
    serde_json::Value,
    OffsetDateTime,
    OffsetDateTime,
);

const SUPPORTER_COLUMNS: &str = "supporter_id, name, primary_email, phone, supporter_type, \
     supporter_type_source, linked_ids, flags, created_at, updated_at";

fn row_to_supporter(row: SupporterRow) -> IngestResult<Supporter> {
    let (
        supporter_id,
        name,
        primary_email,
        phone,
        supporter_type,
        supporter_type_source,
        linked_ids,
        flags,
        created_at,
        updated_at,
    ) = row;

    Ok(Supporter {
        supporter_id,
        name,
        primary_email,
        phone,
        supporter_type: supporter_type.parse().map_err(IngestError::Internal)?,
        supporter_type_source: supporter_type_source.parse().map_err(IngestError::Internal)?,
        linked_ids: serde_json::from_value(linked_ids)?,
        flags: serde_json::from_value::<SupporterFlags>(flags)?,
        created_at,
        updated_at,
    })
}

pub struct PgSupporterRepository {
    pool: PgPool,
}

impl PgSupporterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SupporterRepository for PgSupporterRepository {
    async fn find_by_email(&self, email: &str) -> IngestResult<Vec<Supporter>> {
        let rows: Vec<SupporterRow> = sqlx::query_as(&format!(
            "SELECT {SUPPORTER_COLUMNS} FROM supporters \
             WHERE primary_email = $1 \
             ORDER BY created_at ASC, supporter_id ASC"
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_supporter).collect()
    }

    async fn create(&self, new: NewSupporter) -> IngestResult<Supporter> {
        let supporter_id = Uuid::new_v4();
        let row: SupporterRow = sqlx::query_as(&format!(
            "INSERT INTO supporters \
                 (supporter_id, name, primary_email, phone, linked_ids) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {SUPPORTER_COLUMNS}"
        ))
        .bind(supporter_id)
        .bind(new.name.as_deref())
        .bind(new.primary_email.as_deref())
        .bind(new.phone.as_deref())
        .bind(serde_json::to_value(&new.linked_ids)?)
        .fetch_one(&self.pool)
        .await?;

        row_to_supporter(row)
    }

    async fn update_contact(
        &self,
        supporter_id: Uuid,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> IngestResult<()> {
        sqlx::query(
            "UPDATE supporters \
             SET name = COALESCE(name, $2), phone = COALESCE(phone, $3), updated_at = NOW() \
             WHERE supporter_id = $1",
        )
        .bind(supporter_id)
        .bind(name)
        .bind(phone)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_linked_ids(
        &self,
        supporter_id: Uuid,
        linked_ids: &LinkedIds,
    ) -> IngestResult<()> {
        sqlx::query(
            "UPDATE supporters SET linked_ids = $2, updated_at = NOW() WHERE supporter_id = $1",
        )
        .bind(supporter_id)
        .bind(serde_json::to_value(linked_ids)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_email_alias(
        &self,
        supporter_id: Uuid,
        email: &str,
        is_primary: bool,
    ) -> IngestResult<()> {
        sqlx::query(
            "INSERT INTO supporter_email_aliases (supporter_id, email, is_primary) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (supporter_id, email) DO NOTHING",
        )
        .bind(supporter_id)
        .bind(email)
        .bind(is_primary)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_shared_email_flag(&self, supporter_id: Uuid) -> IngestResult<()> {
        sqlx::query(
            "UPDATE supporters \
             SET flags = flags || '{\"shared_email\": true}'::jsonb, updated_at = NOW() \
             WHERE supporter_id = $1",
        )
        .bind(supporter_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
