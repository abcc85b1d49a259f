//! Supporter 360 Background Worker
//!
//! Handles scheduled jobs including:
//! - Webhook queue processing per provider (every minute)
//! - Stuck-delivery recovery (every 5 minutes)
//! - Future Ticketing order/entry sync (every 15 minutes)
//! - Queue and raw-payload cleanup (daily at 3:00 AM UTC)
//! - Health check heartbeat (every 5 minutes)

mod queue_processor;

use std::sync::Arc;
use std::time::Duration;

use supporter360_ingest::IngestService;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Supporter 360 Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = supporter360_shared::create_pool(&database_url).await?;
    supporter360_shared::run_migrations(&pool).await?;

    let ingest = match IngestService::from_env(pool) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            // Without provider credentials there is nothing to process.
            warn!(error = %e, "Failed to create ingest service - running in minimal mode");

            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (minimal mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Process the webhook queue for every provider (every minute)
    let queue_ingest = ingest.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let ingest = queue_ingest.clone();
            Box::pin(async move {
                queue_processor::process_all_queues(&ingest).await;
            })
        })?)
        .await?;
    info!("Scheduled: Webhook queue processing (every minute)");

    // Job 2: Recover deliveries stuck in 'processing' (every 5 minutes)
    let recovery_ingest = ingest.clone();
    scheduler
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let ingest = recovery_ingest.clone();
            Box::pin(async move {
                match ingest.queue.requeue_stuck().await {
                    Ok(recovered) if recovered > 0 => {
                        warn!(recovered = recovered, "Requeued stuck webhook deliveries");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Stuck-delivery recovery failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stuck-delivery recovery (every 5 minutes)");

    // Job 3: Future Ticketing sync (every 15 minutes)
    let ticketing_ingest = ingest.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let ingest = ticketing_ingest.clone();
            Box::pin(async move {
                queue_processor::run_ticketing_sync(&ingest).await;
            })
        })?)
        .await?;
    info!("Scheduled: Future Ticketing sync (every 15 minutes)");

    // Job 4: Cleanup old queue rows and raw payloads (daily at 3:00 AM UTC)
    let cleanup_ingest = ingest.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let ingest = cleanup_ingest.clone();
            Box::pin(async move {
                queue_processor::run_cleanup(&ingest).await;
            })
        })?)
        .await?;
    info!("Scheduled: Queue and payload cleanup (daily at 3:00 AM UTC)");

    // Job 5: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Supporter 360 Worker started successfully with 5 scheduled jobs");

    // Keep the main task running; the scheduler runs jobs in background
    // tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
