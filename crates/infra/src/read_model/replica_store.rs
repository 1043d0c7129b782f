use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use khata_events::{BusinessSnapshot, BusinessUserSnapshot, UserSnapshot};

/// A replicated document that knows which revision it represents.
pub trait Versioned {
    fn version(&self) -> DateTime<Utc>;
}

impl Versioned for UserSnapshot {
    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Versioned for BusinessSnapshot {
    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Versioned for BusinessUserSnapshot {
    fn version(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// What an upsert did to the stored document.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A document with an equal or older version was overwritten.
    Replaced,
    /// The stored document was already identical.
    Unchanged,
    /// The incoming document was older than the stored one and was dropped.
    Stale,
}

#[derive(Debug, Error)]
pub enum ReplicaStoreError {
    #[error("replica store backend error: {0}")]
    Backend(String),

    #[error("replica document could not be (de)serialized: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type ReplicaResult<T> = Result<T, ReplicaStoreError>;

/// Keyed document store holding another service's entities.
///
/// `upsert` overwrites every field when the incoming version is equal or
/// newer than the stored one, so applying the same snapshot twice leaves the
/// same document.
#[async_trait]
pub trait ReplicaStore<K, V>: Send + Sync {
    async fn find(&self, key: &K) -> ReplicaResult<Option<V>>;
    async fn upsert(&self, key: K, value: V) -> ReplicaResult<UpsertOutcome>;
    async fn list(&self) -> ReplicaResult<Vec<V>>;
}

#[async_trait]
impl<K, V, S> ReplicaStore<K, V> for Arc<S>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
    S: ReplicaStore<K, V> + ?Sized,
{
    async fn find(&self, key: &K) -> ReplicaResult<Option<V>> {
        (**self).find(key).await
    }

    async fn upsert(&self, key: K, value: V) -> ReplicaResult<UpsertOutcome> {
        (**self).upsert(key, value).await
    }

    async fn list(&self) -> ReplicaResult<Vec<V>> {
        (**self).list().await
    }
}

/// In-memory replica store for tests/dev.
#[derive(Debug)]
pub struct InMemoryReplicaStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryReplicaStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryReplicaStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InMemoryReplicaStore<K, V>
where
    K: Eq + Hash,
{
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> ReplicaStoreError {
    ReplicaStoreError::Backend("replica store lock poisoned".into())
}

#[async_trait]
impl<K, V> ReplicaStore<K, V> for InMemoryReplicaStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Versioned + Clone + PartialEq + Send + Sync + 'static,
{
    async fn find(&self, key: &K) -> ReplicaResult<Option<V>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn upsert(&self, key: K, value: V) -> ReplicaResult<UpsertOutcome> {
        let mut map = self.inner.write().map_err(poisoned)?;
        let outcome = match map.get(&key) {
            None => UpsertOutcome::Inserted,
            Some(stored) if stored.version() > value.version() => return Ok(UpsertOutcome::Stale),
            Some(stored) if *stored == value => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Replaced,
        };
        map.insert(key, value);
        Ok(outcome)
    }

    async fn list(&self) -> ReplicaResult<Vec<V>> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.values().cloned().collect())
    }
}
