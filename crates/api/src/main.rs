use std::sync::Arc;

use anyhow::Context;

use cadence_api::app::{self, AppServices};
use cadence_api::app::services::PURGE_INTERVAL;
use cadence_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cadence_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(AppServices::build(&config).context("failed to open job record store")?);
    let purge = services.spawn_record_purge(PURGE_INTERVAL);

    let app = app::build_app(services.clone());
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    purge.abort();
    services.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
