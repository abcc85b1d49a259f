//! HTTP routes.

mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/shopify", post(webhooks::shopify))
        .route("/webhooks/stripe", post(webhooks::stripe))
        .route("/webhooks/gocardless", post(webhooks::gocardless))
        .route("/webhooks/mailchimp", post(webhooks::mailchimp))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
