use std::sync::Arc;

use anyhow::Context;
use khata_infra::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    khata_observability::init("account");

    let config = ServiceConfig::from_env("account")?;
    tracing::info!(?config, "starting account service");

    let service = Arc::new(khata_api::app::services::build_service(&config).await?);
    let app = khata_api::app::build_app(service.clone());

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    service.side_tasks().abort_all();
    Ok(())
}
