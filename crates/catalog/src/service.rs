//! Category operations for the caller's selected business.
//!
//! Access is decided from the membership replicas: the caller's token must be
//! scoped to a business, and a live membership for that pair must have been
//! replicated from the account service.

use std::sync::Arc;

use tracing::{info, instrument};

use khata_auth::AccessClaims;
use khata_core::{BusinessId, Clock, ProductCategoryId, UserId};
use khata_events::BusinessUserSnapshot;
use khata_infra::read_model::ReplicaStore;
use khata_infra::replicas::MembershipKey;

use crate::error::{CategoryError, CategoryResult};
use crate::model::{CategoryInput, CategorySummary, PageQuery, ProductCategory};
use crate::store::CategoryStore;

/// Who is calling, as carried by a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub business_id: Option<BusinessId>,
}

impl From<&AccessClaims> for Caller {
    fn from(claims: &AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            business_id: claims.business_id,
        }
    }
}

pub struct CategoryService {
    store: Arc<dyn CategoryStore>,
    memberships: Arc<dyn ReplicaStore<MembershipKey, BusinessUserSnapshot>>,
    clock: Arc<dyn Clock>,
}

impl CategoryService {
    pub fn new(
        store: Arc<dyn CategoryStore>,
        memberships: Arc<dyn ReplicaStore<MembershipKey, BusinessUserSnapshot>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            memberships,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    #[instrument(skip(self, input), fields(user_id = %caller.user_id))]
    pub async fn create(
        &self,
        caller: Caller,
        input: CategoryInput,
    ) -> CategoryResult<CategorySummary> {
        let name = input.validate()?;
        let business_id = self.authorize(caller).await?;
        let now = self.clock.now();
        let category = ProductCategory {
            id: ProductCategoryId::new(),
            business_id,
            name,
            created_at: now,
            created_by: caller.user_id,
            updated_at: now,
            updated_by: None,
        };
        self.store.insert(category.clone()).await?;
        info!(category_id = %category.id, %business_id, "product category created");
        Ok(category.into())
    }

    #[instrument(skip(self, input), fields(user_id = %caller.user_id))]
    pub async fn update(
        &self,
        caller: Caller,
        id: ProductCategoryId,
        input: CategoryInput,
    ) -> CategoryResult<CategorySummary> {
        let name = input.validate()?;
        let business_id = self.authorize(caller).await?;
        match self.store.find(id).await? {
            Some(existing) if existing.business_id == business_id => {}
            _ => return Err(CategoryError::NotFound),
        }
        let renamed = self
            .store
            .rename(id, &name, caller.user_id, self.clock.now())
            .await?
            .ok_or(CategoryError::NotFound)?;
        Ok(renamed.into())
    }

    pub async fn list(
        &self,
        caller: Caller,
        query: PageQuery,
    ) -> CategoryResult<Vec<CategorySummary>> {
        let page = query.resolve()?;
        let business_id = self.authorize(caller).await?;
        let rows = self
            .store
            .list_by_business(business_id, page.limit, page.offset())
            .await?;
        Ok(rows.into_iter().map(CategorySummary::from).collect())
    }

    async fn authorize(&self, caller: Caller) -> CategoryResult<BusinessId> {
        let business_id = caller
            .business_id
            .ok_or(CategoryError::NoBusinessSelected)?;
        let key = MembershipKey {
            user_id: caller.user_id,
            business_id,
        };
        match self.memberships.find(&key).await? {
            Some(membership) if membership.deleted_at.is_none() => Ok(business_id),
            _ => Err(CategoryError::NotAMember),
        }
    }
}
