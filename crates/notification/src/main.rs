use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use khata_events::LogTransport;
use khata_infra::ServiceConfig;
use khata_infra::event_bus::RedisStreamsTransport;
use khata_infra::replicas::open_replica_stores;
use khata_infra::workers::ConsumerConfig;
use khata_notification::{
    FsTemplateStore, InMemoryTemplateStore, LogMailer, LogSmsSender, Mailer, NotificationDispatcher,
    SmtpMailer, TemplateResolver, spawn_workers,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    khata_observability::init("notification");
    let config = ServiceConfig::from_env("notification")?;
    info!(?config, "starting notification service");

    let redis_url = config.redis_url.as_deref().context("REDIS_URL is required")?;
    let transport: Arc<dyn LogTransport> = Arc::new(
        RedisStreamsTransport::new(redis_url, &config.consumer_name)?
            .with_prefix(&config.stream_prefix),
    );

    let templates: Arc<dyn TemplateResolver> = match &config.template_dir {
        Some(dir) => Arc::new(FsTemplateStore::new(dir)),
        None => Arc::new(InMemoryTemplateStore::with_defaults()),
    };
    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) if config.environment.is_production() => Arc::new(SmtpMailer::new(smtp)?),
        Some(smtp) => Arc::new(SmtpMailer::local(&smtp.host, smtp.port, &smtp.from)?),
        None => Arc::new(LogMailer::new()),
    };

    let consumer = ConsumerConfig::new(&config.consumer_group)
        .with_handler_timeout(config.handler_timeout);

    let stores = open_replica_stores(config.database_url.as_deref()).await?;
    let dispatcher = NotificationDispatcher::new(templates, mailer, Arc::new(LogSmsSender::new()));
    let handles = spawn_workers(transport, stores, dispatcher, consumer);

    tokio::signal::ctrl_c().await?;
    for handle in handles {
        info!(worker = handle.name(), stats = ?handle.stats(), "stopping consumer");
        handle.shutdown().await;
    }
    Ok(())
}
