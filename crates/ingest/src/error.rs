//! Error types for the ingest pipeline.

use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

/// Errors surfaced by the event-processing pipeline.
///
/// Anything that reaches the queue layer as an `Err` is logged and the
/// message is redelivered; data-quality gaps (missing email, missing links)
/// never become errors — handlers log a warning and skip instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("webhook signature invalid")]
    SignatureInvalid,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    ProviderApi(#[from] ProviderApiError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure classification for provider REST calls.
///
/// Callers match on the kind instead of inspecting raw status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 404 from the provider; the referenced resource does not exist.
    NotFound,
    /// 429 after retries were exhausted mid-flight.
    RateLimited,
    /// Any other 4xx; not transient, never retried.
    ClientError,
    /// 5xx from the provider.
    ServerError,
    /// Transport-level failure (timeout, connection reset).
    Network,
    /// Retry budget spent without a terminal answer.
    Exhausted,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::ClientError => "client_error",
            ApiErrorKind::ServerError => "server_error",
            ApiErrorKind::Network => "network",
            ApiErrorKind::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Typed error for a provider REST call, carrying the HTTP status when
/// one was received.
#[derive(Debug, Error)]
#[error("{provider} api error ({kind}{}): {message}", .status.map(|s| format!(", status {s}")).unwrap_or_default())]
pub struct ProviderApiError {
    pub provider: &'static str,
    pub kind: ApiErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProviderApiError {
    pub fn network(provider: &'static str, err: reqwest::Error) -> Self {
        Self {
            provider,
            kind: ApiErrorKind::Network,
            status: None,
            message: err.to_string(),
        }
    }
}
