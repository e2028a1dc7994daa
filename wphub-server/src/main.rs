use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use wphub_connector::ConnectorClient;
use wphub_server::{build_router, AppState, ServerConfig, StaticTokenAuthenticator};
use wphub_storage::Database;
use wphub_sync::{create_poller, ActionOrchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let config = ServerConfig::load().context("loading configuration")?;
    let addr = config.socket_addr()?;

    let db = Database::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    let connector = ConnectorClient::new(config.connector.clone()).context("building connector client")?;
    let orchestrator = Arc::new(ActionOrchestrator::new(Arc::new(connector), db));
    let authenticator = Arc::new(StaticTokenAuthenticator::new(&config.api_tokens));

    let (poller, site_poller) = create_poller(orchestrator.clone(), config.poller.clone());
    let poller_task = tokio::spawn(site_poller.run());

    let app = build_router(AppState::new(orchestrator, authenticator));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        "wphub control plane listening on {addr} (database {})",
        config.database_path.display()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("shutting down");
    if poller.stop().await.is_err() {
        error!("poller already stopped");
    }
    if let Err(e) = poller_task.await {
        error!("poller task failed: {e}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
