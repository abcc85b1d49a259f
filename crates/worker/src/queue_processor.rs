//! Webhook queue draining and scheduled maintenance.

use supporter360_ingest::model::SourceSystem;
use supporter360_ingest::IngestService;
use tracing::{error, info};

/// Messages claimed per provider per tick.
const BATCH_SIZE: i64 = 25;

/// Queue rows kept after delivery or dead-lettering.
const QUEUE_RETENTION_DAYS: i32 = 7;

/// Raw payload blobs kept for audit/replay.
const PAYLOAD_RETENTION_DAYS: i32 = 30;

/// Sync window for the Future Ticketing poll. Runs overlap; the
/// idempotency guard absorbs the duplicates.
const TICKETING_WINDOW_HOURS: i64 = 24;

const WEBHOOK_PROVIDERS: [SourceSystem; 4] = [
    SourceSystem::Shopify,
    SourceSystem::Stripe,
    SourceSystem::Gocardless,
    SourceSystem::Mailchimp,
];

pub async fn process_all_queues(ingest: &IngestService) {
    for provider in WEBHOOK_PROVIDERS {
        process_provider_queue(ingest, provider).await;
    }
}

/// Drain one provider's queue: claim a batch, process each message
/// sequentially, ack on success and nack on failure so the queue retries
/// and eventually dead-letters.
async fn process_provider_queue(ingest: &IngestService, provider: SourceSystem) {
    let batch = match ingest.queue.claim_batch(provider, BATCH_SIZE).await {
        Ok(batch) => batch,
        Err(e) => {
            error!(provider = %provider, error = %e, "Failed to claim webhook batch");
            return;
        }
    };
    if batch.is_empty() {
        return;
    }

    info!(provider = %provider, count = batch.len(), "Processing webhook batch");

    for claimed in batch {
        match ingest
            .processor
            .process_message(claimed.provider, &claimed.message)
            .await
        {
            Ok(()) => {
                if let Err(e) = ingest.queue.ack(claimed.id).await {
                    error!(queue_id = claimed.id, error = %e, "Failed to ack webhook message");
                }
            }
            Err(err) => {
                if let Err(e) = ingest.queue.nack(&claimed, &err.to_string()).await {
                    error!(queue_id = claimed.id, error = %e, "Failed to nack webhook message");
                }
            }
        }
    }
}

pub async fn run_ticketing_sync(ingest: &IngestService) {
    let since = time::OffsetDateTime::now_utc() - time::Duration::hours(TICKETING_WINDOW_HOURS);

    match ingest.ticketing.sync_orders(since).await {
        Ok(written) => info!(written = written, "Ticketing order sync complete"),
        Err(e) => error!(error = %e, "Ticketing order sync failed"),
    }
    match ingest.ticketing.sync_entries(since).await {
        Ok(written) => info!(written = written, "Ticketing entry sync complete"),
        Err(e) => error!(error = %e, "Ticketing entry sync failed"),
    }
}

pub async fn run_cleanup(ingest: &IngestService) {
    match ingest.queue.cleanup(QUEUE_RETENTION_DAYS).await {
        Ok(deleted) => info!(deleted = deleted, "Webhook queue cleanup complete"),
        Err(e) => error!(error = %e, "Webhook queue cleanup failed"),
    }
    match ingest.payloads.delete_older_than(PAYLOAD_RETENTION_DAYS).await {
        Ok(deleted) => info!(deleted = deleted, "Raw payload cleanup complete"),
        Err(e) => error!(error = %e, "Raw payload cleanup failed"),
    }
}
