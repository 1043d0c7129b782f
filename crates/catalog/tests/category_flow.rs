use std::sync::Arc;

use chrono::{Duration, Utc};
use khata_catalog::{
    Caller, CategoryError, CategoryInput, CategoryService, InMemoryCategoryStore, PageQuery,
};
use khata_core::{BusinessId, ManualClock, ProductCategoryId, UserId};
use khata_events::BusinessUserSnapshot;
use khata_infra::read_model::{InMemoryReplicaStore, ReplicaStore};
use khata_infra::replicas::MembershipKey;

struct Harness {
    service: CategoryService,
    memberships: Arc<InMemoryReplicaStore<MembershipKey, BusinessUserSnapshot>>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let memberships: Arc<InMemoryReplicaStore<MembershipKey, BusinessUserSnapshot>> =
            Arc::new(InMemoryReplicaStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let service = CategoryService::new(
            Arc::new(InMemoryCategoryStore::new()),
            memberships.clone(),
            clock.clone(),
        );
        Self {
            service,
            memberships,
            clock,
        }
    }

    /// Replicate a live membership and return a caller scoped to it.
    async fn member(&self, business_id: BusinessId) -> Caller {
        let user_id = UserId::new();
        let now = Utc::now();
        self.memberships
            .upsert(
                MembershipKey {
                    user_id,
                    business_id,
                },
                BusinessUserSnapshot {
                    user_id,
                    business_id,
                    role: "owner".into(),
                    created_at: now,
                    created_by: user_id,
                    updated_at: now,
                    updated_by: None,
                    deleted_at: None,
                    deleted_by: None,
                },
            )
            .await
            .unwrap();
        Caller {
            user_id,
            business_id: Some(business_id),
        }
    }
}

fn input(name: &str) -> CategoryInput {
    CategoryInput { name: name.into() }
}

#[tokio::test]
async fn members_create_rename_and_page_categories() {
    let h = Harness::new();
    let caller = h.member(BusinessId::new()).await;

    let mut created = Vec::new();
    for name in ["Drinks", "Snacks", "Dairy"] {
        created.push(h.service.create(caller, input(name)).await.unwrap());
        h.clock.advance(Duration::seconds(1));
    }
    assert_eq!(created[0].name, "Drinks");

    let renamed = h
        .service
        .update(caller, created[0].id, input("  Beverages  "))
        .await
        .unwrap();
    assert_eq!(renamed.name, "Beverages");
    assert_eq!(renamed.id, created[0].id);

    let first = h
        .service
        .list(caller, PageQuery { page: Some(1), limit: Some(2) })
        .await
        .unwrap();
    let names: Vec<_> = first.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["Beverages", "Snacks"]);

    let second = h
        .service
        .list(caller, PageQuery { page: Some(2), limit: Some(2) })
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].name, "Dairy");

    let defaults = h.service.list(caller, PageQuery::default()).await.unwrap();
    assert_eq!(defaults.len(), 3);
}

#[tokio::test]
async fn access_follows_the_membership_replicas() {
    let h = Harness::new();
    let business_id = BusinessId::new();

    let outsider = Caller {
        user_id: UserId::new(),
        business_id: Some(business_id),
    };
    assert!(matches!(
        h.service.create(outsider, input("Drinks")).await,
        Err(CategoryError::NotAMember)
    ));

    let unscoped = Caller {
        user_id: UserId::new(),
        business_id: None,
    };
    assert!(matches!(
        h.service.list(unscoped, PageQuery::default()).await,
        Err(CategoryError::NoBusinessSelected)
    ));

    // A membership soft-deleted upstream stops granting access.
    let member = h.member(business_id).await;
    h.service.create(member, input("Drinks")).await.unwrap();
    let key = MembershipKey {
        user_id: member.user_id,
        business_id,
    };
    let mut removed = h.memberships.find(&key).await.unwrap().unwrap();
    removed.updated_at = removed.updated_at + Duration::seconds(1);
    removed.deleted_at = Some(removed.updated_at);
    removed.deleted_by = Some(member.user_id);
    h.memberships.upsert(key, removed).await.unwrap();

    assert!(matches!(
        h.service.list(member, PageQuery::default()).await,
        Err(CategoryError::NotAMember)
    ));
}

#[tokio::test]
async fn categories_of_other_businesses_are_not_found() {
    let h = Harness::new();
    let ours = h.member(BusinessId::new()).await;
    let theirs = h.member(BusinessId::new()).await;

    let category = h.service.create(theirs, input("Drinks")).await.unwrap();
    assert!(matches!(
        h.service.update(ours, category.id, input("Mine now")).await,
        Err(CategoryError::NotFound)
    ));
    assert!(matches!(
        h.service.update(ours, ProductCategoryId::new(), input("Ghost")).await,
        Err(CategoryError::NotFound)
    ));
    assert!(h.service.list(ours, PageQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_names_and_pages_are_rejected_before_access_checks() {
    let h = Harness::new();
    let outsider = Caller {
        user_id: UserId::new(),
        business_id: Some(BusinessId::new()),
    };

    let Err(CategoryError::Validation(errors)) = h.service.create(outsider, input("ab")).await
    else {
        panic!("short name accepted");
    };
    assert!(errors.has("name"));

    let long = "x".repeat(101);
    assert!(matches!(
        h.service.create(outsider, input(&long)).await,
        Err(CategoryError::Validation(_))
    ));
    assert!(matches!(
        h.service
            .list(outsider, PageQuery { page: Some(0), limit: None })
            .await,
        Err(CategoryError::Validation(_))
    ));
}
