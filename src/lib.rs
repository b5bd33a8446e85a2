pub mod config;
pub mod errors;
pub mod handlers;
pub mod ingest;
pub mod routes;
pub mod state;
pub mod store;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use errors::{IngestError, IngestResult};
pub use state::AppState;
pub use store::{MemStore, PgStore, Store};
