use std::sync::Arc;

use async_trait::async_trait;

use crate::catalog::CatalogEvent;
use crate::envelope::EventEnvelope;

/// Consumer-side handler for one event kind.
///
/// Returning `Err` (or exceeding the consumer's deadline) leaves the record
/// uncommitted, so it is delivered again. Implementations must therefore be
/// idempotent: applying the same envelope twice has the effect of applying it
/// once.
#[async_trait]
pub trait EventHandler<E>: Send + Sync
where
    E: CatalogEvent,
{
    async fn handle(&self, envelope: EventEnvelope<E>) -> anyhow::Result<()>;
}

#[async_trait]
impl<E, H> EventHandler<E> for Arc<H>
where
    E: CatalogEvent,
    H: EventHandler<E> + ?Sized,
{
    async fn handle(&self, envelope: EventEnvelope<E>) -> anyhow::Result<()> {
        (**self).handle(envelope).await
    }
}
