use std::sync::Arc;

use tracing::{info, warn};

use murmur_api::mailer::LogMailer;
use murmur_db::Database;
use murmur_server::config::Config;
use murmur_server::{ServerState, app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_default_secret() {
        warn!("MURMUR_JWT_SECRET is not set, using the development secret");
    }
    murmur_api::error::init_service_name(config.service_name.clone());

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let state = ServerState::new(db, &config, Arc::new(LogMailer));
    let app = app(state);

    let addr = config.addr()?;
    info!("{} listening on {}", config.service_name, addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
