//! Event publishing abstraction over a partitioned, durable log.
//!
//! ## Delivery model
//!
//! - **Topics**: one per [`EventKind`](crate::EventKind); the topic name is the kind's string.
//! - **Partitions**: a record's key (the entity id) picks its partition. Order is
//!   preserved within a partition only.
//! - **Consumer groups**: each consuming service reads every topic it cares about
//!   under its own group; groups advance independently.
//! - **At-least-once**: a record stays uncommitted until the consumer commits it.
//!   Anything fetched but not committed is fetched again, so handlers must be
//!   idempotent.
//!
//! Producers publish only after their local transaction commits. A publish
//! failure is returned to the caller; the transport never retries on its own.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::catalog::CatalogEvent;
use crate::envelope::EventEnvelope;

/// One record fetched from a topic for a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    /// Transport-assigned position, handed back on commit.
    pub position: String,
    pub key: String,
    pub payload: Vec<u8>,
    /// True when this group has fetched the record before without committing it.
    pub redelivered: bool,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("transport command failed: {0}")]
    Command(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Transport-level contract of the log.
///
/// Implementations: [`InMemoryLog`](crate::InMemoryLog) for tests/dev and a
/// Redis Streams adapter in `khata-infra`.
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Append `payload` to `topic`, partitioned by `key`.
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Next record `group` has not committed on `topic`, or `None` when caught up.
    ///
    /// Records fetched earlier but never committed are returned again.
    async fn fetch(&self, topic: &str, group: &str) -> Result<Option<Record>, TransportError>;

    /// Mark `record` as processed for `group`. Idempotent.
    async fn commit(&self, group: &str, record: &Record) -> Result<(), TransportError>;
}

#[async_trait]
impl<T> LogTransport for Arc<T>
where
    T: LogTransport + ?Sized,
{
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        (**self).append(topic, key, payload).await
    }

    async fn fetch(&self, topic: &str, group: &str) -> Result<Option<Record>, TransportError> {
        (**self).fetch(topic, group).await
    }

    async fn commit(&self, group: &str, record: &Record) -> Result<(), TransportError> {
        (**self).commit(group, record).await
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Typed producer: serializes envelopes and appends them to their topic.
#[derive(Clone)]
pub struct EventPublisher {
    transport: Arc<dyn LogTransport>,
}

impl EventPublisher {
    pub fn new(transport: Arc<dyn LogTransport>) -> Self {
        Self { transport }
    }

    #[instrument(
        skip(self, envelope),
        fields(topic = E::KIND.topic(), event_id = %envelope.id(), action = envelope.action()),
        err
    )]
    pub async fn publish<E: CatalogEvent>(
        &self,
        envelope: &EventEnvelope<E>,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(envelope)?;
        let key = envelope.partition_key();

        self.transport.append(E::KIND.topic(), &key, payload).await?;
        debug!(key = %key, "event published");
        Ok(())
    }

    pub fn transport(&self) -> &Arc<dyn LogTransport> {
        &self.transport
    }
}

impl core::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}
