//! Category persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use khata_core::{BusinessId, ProductCategoryId, UserId};

use crate::model::ProductCategory;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryCategoryStore;
pub use postgres::PostgresCategoryStore;

#[derive(Debug, Error)]
pub enum CategoryStoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type CategoryStoreResult<T> = Result<T, CategoryStoreError>;

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn insert(&self, category: ProductCategory) -> CategoryStoreResult<()>;

    async fn find(&self, id: ProductCategoryId) -> CategoryStoreResult<Option<ProductCategory>>;

    /// Set a new name and stamp the update; `None` if the id is unknown.
    async fn rename(
        &self,
        id: ProductCategoryId,
        name: &str,
        by: UserId,
        at: DateTime<Utc>,
    ) -> CategoryStoreResult<Option<ProductCategory>>;

    /// One page of a business's categories, oldest first.
    async fn list_by_business(
        &self,
        business_id: BusinessId,
        limit: u32,
        offset: u32,
    ) -> CategoryStoreResult<Vec<ProductCategory>>;
}

#[async_trait]
impl<S> CategoryStore for Arc<S>
where
    S: CategoryStore + ?Sized,
{
    async fn insert(&self, category: ProductCategory) -> CategoryStoreResult<()> {
        (**self).insert(category).await
    }

    async fn find(&self, id: ProductCategoryId) -> CategoryStoreResult<Option<ProductCategory>> {
        (**self).find(id).await
    }

    async fn rename(
        &self,
        id: ProductCategoryId,
        name: &str,
        by: UserId,
        at: DateTime<Utc>,
    ) -> CategoryStoreResult<Option<ProductCategory>> {
        (**self).rename(id, name, by, at).await
    }

    async fn list_by_business(
        &self,
        business_id: BusinessId,
        limit: u32,
        offset: u32,
    ) -> CategoryStoreResult<Vec<ProductCategory>> {
        (**self).list_by_business(business_id, limit, offset).await
    }
}
