//! Postgres event repository.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::model::{Event, NewEvent, SourceSystem};

use super::EventRepository;

type EventRow = (
    Uuid,
    Uuid,
    String,
    String,
    OffsetDateTime,
    String,
    Option<Decimal>,
    Option<String>,
    serde_json::Value,
    Option<String>,
    OffsetDateTime,
);

const EVENT_COLUMNS: &str = "event_id, supporter_id, source_system, event_type, event_time, \
     external_id, amount, currency, metadata, raw_payload_ref, created_at";

fn row_to_event(row: EventRow) -> IngestResult<Event> {
    let (
        event_id,
        supporter_id,
        source_system,
        event_type,
        event_time,
        external_id,
        amount,
        currency,
        metadata,
        raw_payload_ref,
        created_at,
    ) = row;

    Ok(Event {
        event_id,
        supporter_id,
        source_system: source_system.parse().map_err(IngestError::Internal)?,
        event_type: event_type.parse().map_err(IngestError::Internal)?,
        event_time,
        external_id,
        amount,
        currency,
        metadata,
        raw_payload_ref,
        created_at,
    })
}

pub struct PgEventRepository {
    pool: PgPool,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn find_by_external_id(
        &self,
        source_system: SourceSystem,
        external_id: &str,
    ) -> IngestResult<Option<Event>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events \
             WHERE source_system = $1 AND external_id = $2"
        ))
        .bind(source_system.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_event).transpose()
    }

    async fn create(&self, new: NewEvent) -> IngestResult<Event> {
        let event_id = Uuid::new_v4();
        let row: EventRow = sqlx::query_as(&format!(
            "INSERT INTO events \
                 (event_id, supporter_id, source_system, event_type, event_time, \
                  external_id, amount, currency, metadata, raw_payload_ref) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (source_system, external_id) DO UPDATE SET \
                 metadata = EXCLUDED.metadata, \
                 raw_payload_ref = COALESCE(EXCLUDED.raw_payload_ref, events.raw_payload_ref) \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event_id)
        .bind(new.supporter_id)
        .bind(new.source_system.as_str())
        .bind(new.event_type.as_str())
        .bind(new.event_time)
        .bind(&new.external_id)
        .bind(new.amount)
        .bind(new.currency.as_deref())
        .bind(&new.metadata)
        .bind(new.raw_payload_ref.as_deref())
        .fetch_one(&self.pool)
        .await?;

        row_to_event(row)
    }
}
