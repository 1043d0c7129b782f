//! Postgres-backed replica store.
//!
//! Every collection shares the `replica_documents` table: one JSONB document
//! per `(collection, key)` plus the document's version. The version guard
//! lives in the upsert itself (`ON CONFLICT ... WHERE`), so concurrent
//! consumers cannot regress a row.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::replica_store::{
    ReplicaResult, ReplicaStore, ReplicaStoreError, UpsertOutcome, Versioned,
};

pub struct PostgresReplicaStore<K, V> {
    pool: Arc<PgPool>,
    collection: &'static str,
    _key: PhantomData<fn(K)>,
    _value: PhantomData<fn() -> V>,
}

impl<K, V> PostgresReplicaStore<K, V> {
    pub fn new(pool: PgPool, collection: &'static str) -> Self {
        Self {
            pool: Arc::new(pool),
            collection,
            _key: PhantomData,
            _value: PhantomData,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.collection
    }
}

#[async_trait]
impl<K, V> ReplicaStore<K, V> for PostgresReplicaStore<K, V>
where
    K: ToString + Send + Sync + 'static,
    V: Versioned + Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    #[instrument(skip(self, key), fields(collection = self.collection), err)]
    async fn find(&self, key: &K) -> ReplicaResult<Option<V>> {
        let row = sqlx::query(
            "SELECT document FROM replica_documents WHERE collection = $1 AND key = $2",
        )
        .bind(self.collection)
        .bind(key.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_replica", e))?;

        match row {
            Some(row) => {
                let document: serde_json::Value = row
                    .try_get("document")
                    .map_err(|e| map_sqlx_error("find_replica", e))?;
                Ok(Some(serde_json::from_value(document)?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, key, value), fields(collection = self.collection), err)]
    async fn upsert(&self, key: K, value: V) -> ReplicaResult<UpsertOutcome> {
        let key = key.to_string();
        let document = serde_json::to_value(&value)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Lock the row (if any) so the outcome we report matches what we wrote.
        let existing = sqlx::query(
            "SELECT document FROM replica_documents WHERE collection = $1 AND key = $2 FOR UPDATE",
        )
        .bind(self.collection)
        .bind(&key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_replica", e))?;

        let written = sqlx::query(
            r#"
            INSERT INTO replica_documents (collection, key, version, document, stored_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (collection, key) DO UPDATE
            SET version = EXCLUDED.version,
                document = EXCLUDED.document,
                stored_at = EXCLUDED.stored_at
            WHERE replica_documents.version <= EXCLUDED.version
            "#,
        )
        .bind(self.collection)
        .bind(&key)
        .bind(value.version())
        .bind(&document)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_replica", e))?
        .rows_affected();

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let outcome = match (existing, written) {
            (None, _) => UpsertOutcome::Inserted,
            (Some(_), 0) => UpsertOutcome::Stale,
            (Some(row), _) => {
                let previous: serde_json::Value = row
                    .try_get("document")
                    .map_err(|e| map_sqlx_error("lock_replica", e))?;
                if previous == document {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Replaced
                }
            }
        };
        Ok(outcome)
    }

    #[instrument(skip(self), fields(collection = self.collection), err)]
    async fn list(&self) -> ReplicaResult<Vec<V>> {
        let rows = sqlx::query(
            "SELECT document FROM replica_documents WHERE collection = $1 ORDER BY key",
        )
        .bind(self.collection)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_replicas", e))?;

        rows.into_iter()
            .map(|row| {
                let document: serde_json::Value = row
                    .try_get("document")
                    .map_err(|e| map_sqlx_error("list_replicas", e))?;
                Ok(serde_json::from_value(document)?)
            })
            .collect()
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ReplicaStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            ReplicaStoreError::Backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            ReplicaStoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => ReplicaStoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}
