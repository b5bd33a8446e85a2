//! Router construction.

pub mod webhooks;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::handlers::api;
use crate::state::AppState;

/// Assembles the full application router.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health_check))
        .merge(webhooks::create_webhook_router())
        .with_state(state)
}
