use anyhow::Result;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

use deepcard::{
    api::{create_router, AppState},
    config::{Config, LoggingConfig},
    database::Database,
    log_system_event,
    logging::init_logging,
    provider_registry::ProviderRegistry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // The guard flushes the file writer on drop, so it lives until exit
    let _guard = init_logging(&LoggingConfig::from_env()?)?;

    let config = Config::from_env()?;
    config.validate()?;

    log_system_event!(startup, component = "server", "Starting DeepCard server");

    let db = Database::new(&config.database.url).await?;
    info!("Database initialized successfully");

    let registry = ProviderRegistry::with_defaults();
    info!(providers = ?registry.list_providers(), "LLM provider registry ready");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config, Arc::new(db), registry);

    let app = create_router(state).layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

    info!("Server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
