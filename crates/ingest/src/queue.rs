//! Postgres-backed webhook event queue.
//!
//! At-least-once delivery: messages are claimed with `FOR UPDATE SKIP
//! LOCKED`, acked on success, and nacked back to `pending` with an
//! exponential redelivery delay on failure. After [`MAX_ATTEMPTS`] the
//! message moves to `dead` — the dead-letter state an operator redrives
//! manually. Rows stuck in `processing` past the visibility timeout are
//! reclaimed by the worker's recovery job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::model::SourceSystem;

/// Delivery attempts before a message is dead-lettered.
pub const MAX_ATTEMPTS: i32 = 5;

/// How long a claimed message may sit in `processing` before the recovery
/// job returns it to `pending`.
pub const VISIBILITY_TIMEOUT_MINUTES: i32 = 30;

/// Redelivery delay in seconds for a message that has failed `attempt`
/// times: 30s, 60s, 120s, ... capped at 15 minutes.
pub fn redelivery_backoff_secs(attempt: i32) -> i64 {
    let shift = attempt.saturating_sub(1).clamp(0, 16) as u32;
    (30i64 << shift).min(900)
}

/// One queued webhook sub-event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub event: serde_json::Value,
    pub raw_payload_ref: String,
    pub correlation_id: Uuid,
}

/// A message claimed for processing.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub id: i64,
    pub provider: SourceSystem,
    pub attempts: i32,
    pub message: QueueMessage,
}

/// Producer side of the queue; the receiver only needs `enqueue`.
#[async_trait]
pub trait QueueSink: Send + Sync {
    async fn enqueue(&self, provider: SourceSystem, message: &QueueMessage) -> IngestResult<i64>;
}

#[derive(Clone)]
pub struct EventQueue {
    pool: PgPool,
}

#[async_trait]
impl QueueSink for EventQueue {
    async fn enqueue(&self, provider: SourceSystem, message: &QueueMessage) -> IngestResult<i64> {
        EventQueue::enqueue(self, provider, message).await
    }
}

impl EventQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        provider: SourceSystem,
        message: &QueueMessage,
    ) -> IngestResult<i64> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO webhook_queue (provider, message) VALUES ($1, $2) RETURNING id",
        )
        .bind(provider.as_str())
        .bind(serde_json::to_value(message)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Claim up to `limit` due messages for one provider. The claim bumps
    /// `attempts`, so a message that dies mid-processing still counts the
    /// attempt when the recovery job returns it to `pending`.
    pub async fn claim_batch(
        &self,
        provider: SourceSystem,
        limit: i64,
    ) -> IngestResult<Vec<ClaimedMessage>> {
        let rows: Vec<(i64, String, i32, serde_json::Value)> = sqlx::query_as(
            "UPDATE webhook_queue SET \
                 status = 'processing', claimed_at = NOW(), updated_at = NOW(), \
                 attempts = webhook_queue.attempts + 1 \
             WHERE id IN ( \
                 SELECT id FROM webhook_queue \
                 WHERE provider = $1 AND status = 'pending' AND available_at <= NOW() \
                 ORDER BY id \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED) \
             RETURNING id, provider, attempts, message",
        )
        .bind(provider.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, provider, attempts, message)| {
                Ok(ClaimedMessage {
                    id,
                    provider: provider.parse().map_err(IngestError::Internal)?,
                    attempts,
                    message: serde_json::from_value(message)?,
                })
            })
            .collect()
    }

    pub async fn ack(&self, id: i64) -> IngestResult<()> {
        sqlx::query(
            "UPDATE webhook_queue SET status = 'delivered', updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Return a failed message to the queue, or dead-letter it once the
    /// attempt budget is spent.
    pub async fn nack(&self, claimed: &ClaimedMessage, error: &str) -> IngestResult<()> {
        if claimed.attempts >= MAX_ATTEMPTS {
            sqlx::query(
                "UPDATE webhook_queue SET status = 'dead', last_error = $2, updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(claimed.id)
            .bind(error)
            .execute(&self.pool)
            .await?;

            tracing::error!(
                queue_id = claimed.id,
                provider = %claimed.provider,
                attempts = claimed.attempts,
                error = %error,
                "Webhook message dead-lettered"
            );
            return Ok(());
        }

        let delay = redelivery_backoff_secs(claimed.attempts);
        sqlx::query(
            "UPDATE webhook_queue SET \
                 status = 'pending', last_error = $2, updated_at = NOW(), \
                 available_at = NOW() + ($3::TEXT || ' seconds')::INTERVAL \
             WHERE id = $1",
        )
        .bind(claimed.id)
        .bind(error)
        .bind(delay)
        .execute(&self.pool)
        .await?;

        tracing::warn!(
            queue_id = claimed.id,
            provider = %claimed.provider,
            attempts = claimed.attempts,
            retry_in_secs = delay,
            error = %error,
            "Webhook message scheduled for redelivery"
        );
        Ok(())
    }

    /// Return messages stuck in `processing` past the visibility timeout to
    /// `pending`. Returns the number recovered.
    pub async fn requeue_stuck(&self) -> IngestResult<u64> {
        let result = sqlx::query(
            "UPDATE webhook_queue SET status = 'pending', updated_at = NOW() \
             WHERE status = 'processing' \
               AND claimed_at < NOW() - ($1::TEXT || ' minutes')::INTERVAL",
        )
        .bind(VISIBILITY_TIMEOUT_MINUTES)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Delete delivered and dead rows older than the retention window.
    pub async fn cleanup(&self, retain_days: i32) -> IngestResult<u64> {
        let result = sqlx::query(
            "DELETE FROM webhook_queue \
             WHERE status IN ('delivered', 'dead') \
               AND updated_at < NOW() - ($1::TEXT || ' days')::INTERVAL",
        )
        .bind(retain_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
