//! Inbound webhook endpoints, one per provider.
//!
//! Handlers take the raw body bytes (signatures are computed over the
//! exact payload) and map receiver outcomes to HTTP statuses:
//! 202 accepted, 401 missing/invalid signature, 400 malformed payload,
//! 500 internal error.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};
use supporter360_ingest::{Receipt, ReceiveError};

use crate::state::AppState;

const SHOPIFY_HMAC_HEADER: &str = "x-shopify-hmac-sha256";
const SHOPIFY_TOPIC_HEADER: &str = "x-shopify-topic";
const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
const GOCARDLESS_SIGNATURE_HEADER: &str = "webhook-signature";

pub async fn shopify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_value(&headers, SHOPIFY_HMAC_HEADER);
    let topic = header_value(&headers, SHOPIFY_TOPIC_HEADER);
    respond(
        state
            .ingest
            .receiver
            .receive_shopify(&body, signature, topic, headers_json(&headers))
            .await,
    )
}

pub async fn stripe(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = header_value(&headers, STRIPE_SIGNATURE_HEADER);
    respond(
        state
            .ingest
            .receiver
            .receive_stripe(&body, signature, headers_json(&headers))
            .await,
    )
}

pub async fn gocardless(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_value(&headers, GOCARDLESS_SIGNATURE_HEADER);
    respond(
        state
            .ingest
            .receiver
            .receive_gocardless(&body, signature, headers_json(&headers))
            .await,
    )
}

pub async fn mailchimp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    respond(
        state
            .ingest
            .receiver
            .receive_mailchimp(&body, headers_json(&headers))
            .await,
    )
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Headers persisted alongside the raw payload for audit/replay.
fn headers_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    Value::Object(map)
}

fn respond(result: Result<Receipt, ReceiveError>) -> Response {
    match result {
        Ok(receipt) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "received": true,
                "correlation_id": receipt.correlation_id,
            })),
        )
            .into_response(),
        Err(ReceiveError::MissingSignature) | Err(ReceiveError::InvalidSignature) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid signature"})),
        )
            .into_response(),
        Err(ReceiveError::MalformedPayload(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": message}))).into_response()
        }
        Err(ReceiveError::Internal(err)) => {
            tracing::error!(error = %err, "Webhook receive failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}
