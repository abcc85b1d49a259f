//! Application state

use std::sync::Arc;

use sqlx::PgPool;
use supporter360_ingest::IngestService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub ingest: Arc<IngestService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let ingest = IngestService::from_env(pool.clone())
            .map_err(|err| anyhow::anyhow!("failed to create ingest service: {err}"))?;
        tracing::info!("Ingest service initialized");

        Ok(Self {
            pool,
            config,
            ingest: Arc::new(ingest),
        })
    }
}
