//! Dispatch gateway entry point.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dispatch_gateway::api::{create_router, AppState};
use dispatch_gateway::config::GatewayConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting dispatch gateway v{}", env!("CARGO_PKG_VERSION"));

    let config = GatewayConfig::load().expect("failed to load configuration");
    tracing::info!("configuration loaded");

    let state = AppState::build(&config).await?;
    tracing::info!("application state built, database migrated, scheduler started");

    let app = create_router(state);

    let addr = config.server_addr();
    tracing::info!("http server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
