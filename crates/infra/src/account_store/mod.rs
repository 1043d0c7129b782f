//! Relational account store adapters.

pub mod postgres;

pub use postgres::{PostgresAccountStore, PostgresAccountTransaction};
