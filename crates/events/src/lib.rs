//! `khata-events` — the shared event contract between services.
//!
//! - [`catalog`]: the closed set of event kinds and their payloads
//! - [`envelope`]: the wire envelope every message travels in
//! - [`bus`]: the partitioned-log transport abstraction and typed publisher
//! - [`handler`]: the consumer-side handler contract

pub mod bus;
pub mod catalog;
pub mod envelope;
pub mod handler;
pub mod in_memory_log;
pub mod notification;

pub use bus::{EventPublisher, LogTransport, PublishError, Record, TransportError};
pub use catalog::{
    BusinessSnapshot, BusinessUserSnapshot, CatalogEvent, EventKind, Industry, UserSnapshot,
};
pub use envelope::{EventEnvelope, action};
pub use handler::EventHandler;
pub use in_memory_log::InMemoryLog;
pub use notification::{
    Channel, ChannelPayload, DeliveryKind, EmailRecipients, NotificationEvent,
    NotificationRequest, PushRecipients, SmsRecipients,
};
