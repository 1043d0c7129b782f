use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{CatalogEvent, EventKind};

/// Well-known action tags.
pub mod action {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const SEND: &str = "send";
}

/// Envelope for one message on the bus.
///
/// Wire format: `{id, event, data, timestamp, action}`.
///
/// Notes:
/// - `event` identifies the catalog entry and therefore the topic.
/// - `action` is a free-form tag (`create`, `update`, `send`); consumers of
///   snapshot events treat every action as an upsert.
/// - Envelopes are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    id: Uuid,
    event: EventKind,
    data: T,
    timestamp: DateTime<Utc>,
    action: String,
}

impl<T: CatalogEvent> EventEnvelope<T> {
    /// Wrap `data` with a fresh id and the current timestamp.
    pub fn new(action: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::now_v7(),
            event: T::KIND,
            data,
            timestamp: Utc::now(),
            action: action.into(),
        }
    }

    /// Key that decides the partition; messages sharing it stay ordered.
    pub fn partition_key(&self) -> String {
        self.data.partition_key()
    }
}

impl<T> EventEnvelope<T> {
    /// Rebuild an envelope from its parts (transports, fixtures).
    pub fn from_parts(
        id: Uuid,
        event: EventKind,
        data: T,
        timestamp: DateTime<Utc>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id,
            event,
            data,
            timestamp,
            action: action.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> EventKind {
        self.event
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn into_data(self) -> T {
        self.data
    }
}
