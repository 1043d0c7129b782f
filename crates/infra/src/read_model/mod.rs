//! Replica storage for entities owned by other services.

pub mod postgres;
pub mod replica_store;

pub use postgres::PostgresReplicaStore;
pub use replica_store::{
    InMemoryReplicaStore, ReplicaResult, ReplicaStore, ReplicaStoreError, UpsertOutcome, Versioned,
};
