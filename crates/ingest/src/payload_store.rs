//! Raw payload store: durable copies of verified webhook bodies for
//! audit/replay, keyed `{provider}/{yyyy-mm-dd}/{uuid}.json`.

use async_trait::async_trait;
use sqlx::PgPool;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::IngestResult;
use crate::model::SourceSystem;

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Build the blob key for a received payload. Date component is UTC.
pub fn payload_key(provider: SourceSystem, received_at: OffsetDateTime, correlation_id: Uuid) -> String {
    let date = received_at
        .date()
        .format(DATE_FORMAT)
        .unwrap_or_else(|_| String::from("unknown-date"));
    format!("{provider}/{date}/{correlation_id}.json")
}

#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Persist a payload under its key. Must complete before the matching
    /// queue message is enqueued so processors can always dereference the
    /// reference they are handed.
    async fn put(&self, key: &str, body: &serde_json::Value) -> IngestResult<()>;

    async fn get(&self, key: &str) -> IngestResult<Option<serde_json::Value>>;
}

/// Payload store backed by the `raw_payloads` table.
pub struct PgPayloadStore {
    pool: PgPool,
}

impl PgPayloadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop payloads older than the retention window. Returns rows deleted.
    pub async fn delete_older_than(&self, days: i32) -> IngestResult<u64> {
        let result = sqlx::query(
            "DELETE FROM raw_payloads \
             WHERE stored_at < NOW() - ($1::TEXT || ' days')::INTERVAL",
        )
        .bind(days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl PayloadStore for PgPayloadStore {
    async fn put(&self, key: &str, body: &serde_json::Value) -> IngestResult<()> {
        sqlx::query(
            "INSERT INTO raw_payloads (key, body) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET body = EXCLUDED.body, stored_at = NOW()",
        )
        .bind(key)
        .bind(body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> IngestResult<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM raw_payloads WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(body,)| body))
    }
}

impl std::fmt::Debug for PgPayloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPayloadStore").finish_non_exhaustive()
    }
}
