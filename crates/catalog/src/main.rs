//! Catalog service: product categories over HTTP, plus the replica consumers
//! that keep users, businesses and memberships in sync.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use khata_auth::TokenIssuer;
use khata_catalog::{
    CategoryService, CategoryStore, InMemoryCategoryStore, PostgresCategoryStore, http,
};
use khata_core::SystemClock;
use khata_events::LogTransport;
use khata_infra::event_bus::RedisStreamsTransport;
use khata_infra::replicas::{SharedReplicaStores, spawn_replica_consumers};
use khata_infra::workers::ConsumerConfig;
use khata_infra::{ServiceConfig, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    khata_observability::init("catalog");
    let config = ServiceConfig::from_env("catalog")?;
    info!(?config, "starting catalog service");

    let redis_url = config.redis_url.as_deref().context("REDIS_URL is required")?;
    let transport: Arc<dyn LogTransport> = Arc::new(
        RedisStreamsTransport::new(redis_url, &config.consumer_name)?
            .with_prefix(&config.stream_prefix),
    );
    let consumer = ConsumerConfig::new(&config.consumer_group)
        .with_handler_timeout(config.handler_timeout);

    let (stores, categories): (SharedReplicaStores, Arc<dyn CategoryStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, 5).await?;
                (
                    SharedReplicaStores::postgres(pool.clone()),
                    Arc::new(PostgresCategoryStore::new(pool)),
                )
            }
            None => {
                info!("DATABASE_URL not set, categories and replicas are kept in memory");
                (
                    SharedReplicaStores::in_memory(),
                    Arc::new(InMemoryCategoryStore::new()),
                )
            }
        };

    let handles = spawn_replica_consumers(transport, stores.clone(), consumer);

    let tokens = Arc::new(TokenIssuer::new(
        config.jwt_secret.as_bytes(),
        config.jwt_issuer.clone(),
        chrono::Duration::from_std(config.jwt_lifetime).context("JWT lifetime out of range")?,
    ));
    let service = Arc::new(CategoryService::new(
        categories,
        stores.memberships.clone(),
        Arc::new(SystemClock),
    ));

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    info!(addr = %config.http_addr, "catalog listening");
    axum::serve(listener, http::build_app(service, tokens))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    for handle in handles {
        info!(worker = handle.name(), stats = ?handle.stats(), "stopping consumer");
        handle.shutdown().await;
    }
    Ok(())
}
