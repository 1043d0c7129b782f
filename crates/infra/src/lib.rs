//! Infrastructure layer: Postgres and Redis adapters, consumer workers,
//! replica sync and service configuration.

pub mod account_store;
pub mod config;
pub mod db;
pub mod event_bus;
pub mod read_model;
pub mod replicas;
pub mod workers;

pub use config::{ConfigError, Environment, ServiceConfig, SmtpConfig};
