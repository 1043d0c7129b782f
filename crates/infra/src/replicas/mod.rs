//! Replica sync: keep local copies of users, businesses and memberships in
//! step with the account service.
//!
//! Each topic gets one consumer whose handler upserts the snapshot under its
//! entity key. The upsert is version guarded, so redelivery and late
//! duplicates are harmless.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};

use khata_core::{BusinessId, UserId};
use khata_events::{
    BusinessSnapshot, BusinessUserSnapshot, CatalogEvent, EventEnvelope, EventHandler,
    LogTransport, UserSnapshot,
};

use crate::db;
use crate::read_model::{
    InMemoryReplicaStore, PostgresReplicaStore, ReplicaStore, UpsertOutcome, Versioned,
};
use crate::workers::{ConsumerConfig, ConsumerHandle, ConsumerWorker};

/// Composite key of a business membership.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MembershipKey {
    pub user_id: UserId,
    pub business_id: BusinessId,
}

impl fmt::Display for MembershipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.business_id, self.user_id)
    }
}

/// A snapshot event that can be stored as a replica.
pub trait Replicated: CatalogEvent + Versioned {
    type Key: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static;

    /// Collection name used by document stores.
    const COLLECTION: &'static str;

    fn replica_key(&self) -> Self::Key;
}

impl Replicated for UserSnapshot {
    type Key = UserId;
    const COLLECTION: &'static str = "users";

    fn replica_key(&self) -> UserId {
        self.id
    }
}

impl Replicated for BusinessSnapshot {
    type Key = BusinessId;
    const COLLECTION: &'static str = "businesses";

    fn replica_key(&self) -> BusinessId {
        self.id
    }
}

impl Replicated for BusinessUserSnapshot {
    type Key = MembershipKey;
    const COLLECTION: &'static str = "business_users";

    fn replica_key(&self) -> MembershipKey {
        MembershipKey {
            user_id: self.user_id,
            business_id: self.business_id,
        }
    }
}

/// Applies snapshots of `E` to a replica store.
pub struct ReplicaSync<E, S> {
    store: S,
    _event: PhantomData<fn(E)>,
}

impl<E, S> ReplicaSync<E, S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<E, S> EventHandler<E> for ReplicaSync<E, S>
where
    E: Replicated,
    S: ReplicaStore<E::Key, E> + 'static,
{
    async fn handle(&self, envelope: EventEnvelope<E>) -> anyhow::Result<()> {
        let event_id = envelope.id();
        let snapshot = envelope.into_data();
        let key = snapshot.replica_key();

        let outcome = self.store.upsert(key.clone(), snapshot).await?;
        match outcome {
            UpsertOutcome::Stale => info!(
                collection = E::COLLECTION,
                key = %key,
                %event_id,
                "skipped stale snapshot"
            ),
            _ => debug!(
                collection = E::COLLECTION,
                key = %key,
                %event_id,
                ?outcome,
                "replica updated"
            ),
        }
        Ok(())
    }
}

/// Replica stores for the three synchronised collections.
#[derive(Clone)]
pub struct ReplicaStores<U, B, M> {
    pub users: U,
    pub businesses: B,
    pub memberships: M,
}

/// Type-erased stores that the sync consumers and local readers share.
pub type SharedReplicaStores = ReplicaStores<
    Arc<dyn ReplicaStore<UserId, UserSnapshot>>,
    Arc<dyn ReplicaStore<BusinessId, BusinessSnapshot>>,
    Arc<dyn ReplicaStore<MembershipKey, BusinessUserSnapshot>>,
>;

impl SharedReplicaStores {
    pub fn in_memory() -> Self {
        Self {
            users: Arc::new(InMemoryReplicaStore::<UserId, UserSnapshot>::new()),
            businesses: Arc::new(InMemoryReplicaStore::<BusinessId, BusinessSnapshot>::new()),
            memberships: Arc::new(InMemoryReplicaStore::<MembershipKey, BusinessUserSnapshot>::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PostgresReplicaStore::<UserId, UserSnapshot>::new(
                pool.clone(),
                UserSnapshot::COLLECTION,
            )),
            businesses: Arc::new(PostgresReplicaStore::<BusinessId, BusinessSnapshot>::new(
                pool.clone(),
                BusinessSnapshot::COLLECTION,
            )),
            memberships: Arc::new(PostgresReplicaStore::<MembershipKey, BusinessUserSnapshot>::new(
                pool,
                BusinessUserSnapshot::COLLECTION,
            )),
        }
    }
}

/// Postgres-backed stores when `database_url` is set, in-memory otherwise.
pub async fn open_replica_stores(
    database_url: Option<&str>,
) -> Result<SharedReplicaStores, sqlx::Error> {
    match database_url {
        Some(url) => {
            let pool = db::connect(url, 5).await?;
            info!("replica stores: postgres");
            Ok(SharedReplicaStores::postgres(pool))
        }
        None => {
            info!("DATABASE_URL not set, replicas are kept in memory");
            Ok(SharedReplicaStores::in_memory())
        }
    }
}

/// Spawn one consumer per replicated topic, all in `config.group`.
pub fn spawn_replica_consumers<U, B, M>(
    transport: Arc<dyn LogTransport>,
    stores: ReplicaStores<U, B, M>,
    config: ConsumerConfig,
) -> Vec<ConsumerHandle>
where
    U: ReplicaStore<UserId, UserSnapshot> + 'static,
    B: ReplicaStore<BusinessId, BusinessSnapshot> + 'static,
    M: ReplicaStore<MembershipKey, BusinessUserSnapshot> + 'static,
{
    vec![
        ConsumerWorker::spawn::<UserSnapshot, _>(
            "replica-users",
            transport.clone(),
            ReplicaSync::new(stores.users),
            config.clone(),
        ),
        ConsumerWorker::spawn::<BusinessSnapshot, _>(
            "replica-businesses",
            transport.clone(),
            ReplicaSync::new(stores.businesses),
            config.clone(),
        ),
        ConsumerWorker::spawn::<BusinessUserSnapshot, _>(
            "replica-business-users",
            transport,
            ReplicaSync::new(stores.memberships),
            config,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use khata_events::{EventPublisher, InMemoryLog, action};

    use super::*;
    use crate::read_model::InMemoryReplicaStore;

    fn user(name: &str, at: DateTime<Utc>) -> UserSnapshot {
        UserSnapshot {
            id: UserId::new(),
            human_id: "user-BBBBBBB".into(),
            name: name.into(),
            email: "ann@x.com".into(),
            phone: "+15550100000".into(),
            avatar: None,
            email_verified: false,
            phone_verified: false,
            created_at: at,
            created_by: UserId::root(),
            updated_at: at,
            updated_by: None,
            deactivated_at: None,
            deactivated_by: None,
            deleted_at: None,
            deleted_by: None,
        }
    }

    #[tokio::test]
    async fn redelivered_envelope_leaves_an_identical_record() {
        let store = Arc::new(InMemoryReplicaStore::<UserId, UserSnapshot>::new());
        let sync = ReplicaSync::new(store.clone());
        let envelope = EventEnvelope::new(action::CREATE, user("Ann", Utc::now()));

        sync.handle(envelope.clone()).await.unwrap();
        let first = store.find(&envelope.data().id).await.unwrap();
        sync.handle(envelope.clone()).await.unwrap();
        let second = store.find(&envelope.data().id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_ref(), Some(envelope.data()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn older_snapshot_arriving_late_is_ignored() {
        let store = Arc::new(InMemoryReplicaStore::<UserId, UserSnapshot>::new());
        let sync = ReplicaSync::new(store.clone());
        let t0 = Utc::now();
        let old = user("Ann", t0);
        let mut new = old.clone();
        new.email_verified = true;
        new.updated_at = t0 + chrono::Duration::seconds(3);

        sync.handle(EventEnvelope::new(action::UPDATE, new.clone())).await.unwrap();
        sync.handle(EventEnvelope::new(action::CREATE, old.clone())).await.unwrap();

        assert_eq!(store.find(&old.id).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn consumers_replicate_published_snapshots() {
        let log = Arc::new(InMemoryLog::new());
        let transport: Arc<dyn LogTransport> = log.clone();
        let publisher = EventPublisher::new(transport.clone());

        let users = Arc::new(InMemoryReplicaStore::<UserId, UserSnapshot>::new());
        let businesses = Arc::new(InMemoryReplicaStore::<BusinessId, BusinessSnapshot>::new());
        let memberships =
            Arc::new(InMemoryReplicaStore::<MembershipKey, BusinessUserSnapshot>::new());
        let handles = spawn_replica_consumers(
            transport,
            ReplicaStores {
                users: users.clone(),
                businesses: businesses.clone(),
                memberships: memberships.clone(),
            },
            ConsumerConfig::new("catalog").with_idle_wait(Duration::from_millis(5)),
        );

        let now = Utc::now();
        let ann = user("Ann", now);
        let business_id = BusinessId::new();
        publisher
            .publish(&EventEnvelope::new(action::CREATE, ann.clone()))
            .await
            .unwrap();
        publisher
            .publish(&EventEnvelope::new(
                action::CREATE,
                BusinessUserSnapshot {
                    user_id: ann.id,
                    business_id,
                    role: "Owner".into(),
                    created_at: now,
                    created_by: ann.id,
                    updated_at: now,
                    updated_by: None,
                    deleted_at: None,
                    deleted_by: None,
                },
            ))
            .await
            .unwrap();

        for _ in 0..200 {
            if users.len() == 1 && memberships.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(users.find(&ann.id).await.unwrap(), Some(ann.clone()));
        let key = MembershipKey {
            user_id: ann.id,
            business_id,
        };
        assert_eq!(key.to_string(), format!("{business_id}:{}", ann.id));
        assert!(memberships.find(&key).await.unwrap().is_some());
        assert!(businesses.is_empty());

        for handle in handles {
            handle.shutdown().await;
        }
    }

    #[tokio::test]
    async fn shared_stores_are_readable_while_consumers_write() {
        let log = Arc::new(InMemoryLog::new());
        let transport: Arc<dyn LogTransport> = log.clone();
        let stores = SharedReplicaStores::in_memory();
        let handles = spawn_replica_consumers(
            transport.clone(),
            stores.clone(),
            ConsumerConfig::new("notification").with_idle_wait(Duration::from_millis(5)),
        );

        let ann = user("Ann", Utc::now());
        EventPublisher::new(transport)
            .publish(&EventEnvelope::new(action::CREATE, ann.clone()))
            .await
            .unwrap();

        let mut found = None;
        for _ in 0..200 {
            found = stores.users.find(&ann.id).await.unwrap();
            if found.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(found, Some(ann));
        assert!(stores.businesses.list().await.unwrap().is_empty());

        for handle in handles {
            handle.shutdown().await;
        }
    }

    #[tokio::test]
    async fn without_a_database_url_replicas_live_in_memory() {
        let stores = open_replica_stores(None).await.unwrap();
        assert!(stores.memberships.list().await.unwrap().is_empty());
    }
}
