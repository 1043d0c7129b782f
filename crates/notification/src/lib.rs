//! `khata-notification` turns `manage-notification` events into email and
//! SMS deliveries.
//!
//! - [`templates`]: template lookup (in-memory defaults, filesystem)
//! - [`render`]: token substitution
//! - [`channels`]: mail and SMS transports
//! - [`dispatcher`]: the consumer handler tying them together
//!
//! The service also keeps replicas of users, businesses and memberships;
//! [`spawn_workers`] starts those consumers next to the dispatcher.

pub mod channels;
pub mod dispatcher;
pub mod render;
pub mod templates;

use std::sync::Arc;

use khata_events::{LogTransport, NotificationRequest};
use khata_infra::replicas::{SharedReplicaStores, spawn_replica_consumers};
use khata_infra::workers::{ConsumerConfig, ConsumerHandle, ConsumerWorker};

pub use channels::{
    ChannelError, LogMailer, LogSmsSender, Mailer, OutgoingEmail, OutgoingSms, SmsSender,
    SmtpMailer,
};
pub use dispatcher::NotificationDispatcher;
pub use render::{RenderError, render};
pub use templates::{
    FsTemplateStore, InMemoryTemplateStore, Mimetype, Template, TemplateError, TemplateQuery,
    TemplateResolver,
};

/// Start the replica consumers and the dispatcher, all in `config.group`.
pub fn spawn_workers(
    transport: Arc<dyn LogTransport>,
    stores: SharedReplicaStores,
    dispatcher: NotificationDispatcher,
    config: ConsumerConfig,
) -> Vec<ConsumerHandle> {
    let mut handles = spawn_replica_consumers(transport.clone(), stores, config.clone());
    handles.push(ConsumerWorker::spawn::<NotificationRequest, _>(
        "notification-dispatcher",
        transport,
        dispatcher,
        config,
    ));
    handles
}
