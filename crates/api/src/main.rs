//! DonorSync API Server
//!
//! Receives donation and subscription webhooks, reconciles them into the
//! member store and serves membership stats.

use std::net::SocketAddr;
use std::sync::Arc;

use donorsync_api::{create_router, AppState, Config};
use donorsync_membership::{create_pool, ensure_schema, PgMemberStore};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,donorsync_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DonorSync API Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(config = ?config, "Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.pool_settings()).await?;
    ensure_schema(&pool).await?;
    tracing::info!("Database connection established");

    if !config.always_acknowledge_webhooks {
        tracing::warn!("ALWAYS_ACKNOWLEDGE_WEBHOOKS is off, senders will retry failed webhooks");
    }

    let addr: SocketAddr = config.bind_address.parse()?;
    let state = AppState::new(Arc::new(PgMemberStore::new(pool)), config)?;

    let app = create_router(state).layer(TraceLayer::new_for_http());

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
