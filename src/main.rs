use std::sync::Arc;

use anyhow::anyhow;
use tokio::net::TcpListener;

use leadwire::{AppState, PgStore, ServerConfig, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadwire=info,tower_http=info".into()),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    let address = config.address();

    // Connect the store and apply migrations
    let store = PgStore::connect(&config)
        .await
        .map_err(|e| anyhow!("failed to connect to database: {e}"))?;
    store
        .migrate()
        .await
        .map_err(|e| anyhow!(e.to_string()))?;

    // Create application state and router
    let app_state = AppState::new(config, Arc::new(store));
    let app = routes::create_app(app_state);

    // Create listener
    let listener = TcpListener::bind(&address).await?;
    tracing::info!(%address, "Server listening");

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}
