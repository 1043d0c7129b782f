//! Background workers driving event consumption.

pub mod backoff;
pub mod consumer_worker;

pub use backoff::Backoff;
pub use consumer_worker::{ConsumerConfig, ConsumerHandle, ConsumerStats, ConsumerWorker};
