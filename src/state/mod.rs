use std::sync::Arc;

use crate::config::ServerConfig;
use crate::store::Store;

/// Application state that can be shared across handlers.
///
/// Immutable after startup: all per-request identity (tenant, contact, lead)
/// flows through handler arguments, never through shared mutable state.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    /// Persistence seam; Postgres in production, in-memory in tests
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self { config, store })
    }
}
