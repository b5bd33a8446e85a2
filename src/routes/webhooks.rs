use axum::{Router, routing::post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{lead_webhook, telephony_webhook};
use crate::state::AppState;

/// Create the webhook router for the two ingestion surfaces
///
/// These routes are called by external lead sources and the telephony
/// provider. They authenticate via the path-embedded secret or tenant slug,
/// not via session auth, so they are mounted without any auth middleware.
pub fn create_webhook_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/webhooks/lead/{secret}",
            post(lead_webhook::handle_lead_webhook),
        )
        .route(
            "/webhooks/telephony/{tenant_slug}",
            post(telephony_webhook::handle_telephony_webhook),
        )
        .layer(TraceLayer::new_for_http())
}
