//! Infrastructure wiring for the account service.
//!
//! With `DATABASE_URL` and `REDIS_URL` set, the service runs on Postgres and
//! Redis Streams. Without them it falls back to the in-memory store and log,
//! which only makes sense for local development.

use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use tracing::{info, warn};

use khata_auth::{AccountService, AccountStore, BcryptHasher, InMemoryAccountStore, TokenIssuer};
use khata_core::SystemClock;
use khata_events::{EventPublisher, InMemoryLog, LogTransport};
use khata_infra::ServiceConfig;
use khata_infra::account_store::PostgresAccountStore;
use khata_infra::db;
use khata_infra::event_bus::RedisStreamsTransport;

pub async fn build_service(config: &ServiceConfig) -> anyhow::Result<AccountService> {
    let store: Arc<dyn AccountStore> = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url, 10).await.context("connect to postgres")?;
            info!("account store: postgres");
            Arc::new(PostgresAccountStore::new(pool))
        }
        None if config.environment.is_production() => {
            anyhow::bail!("DATABASE_URL is required in production")
        }
        None => {
            warn!("DATABASE_URL not set; accounts are kept in memory");
            Arc::new(InMemoryAccountStore::new())
        }
    };

    let transport: Arc<dyn LogTransport> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStreamsTransport::new(url, &config.consumer_name)?
                .with_prefix(&config.stream_prefix),
        ),
        None if config.environment.is_production() => {
            anyhow::bail!("REDIS_URL is required in production")
        }
        None => {
            warn!("REDIS_URL not set; events stay in process");
            Arc::new(InMemoryLog::new())
        }
    };

    let lifetime = Duration::from_std(config.jwt_lifetime).context("JWT lifetime out of range")?;
    Ok(AccountService::new(
        store,
        EventPublisher::new(transport),
        Arc::new(BcryptHasher::default()),
        TokenIssuer::new(config.jwt_secret.as_bytes(), config.jwt_issuer.clone(), lifetime),
        Arc::new(SystemClock),
    ))
}
