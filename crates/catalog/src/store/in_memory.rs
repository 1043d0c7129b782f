//! In-memory category store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use khata_core::{BusinessId, ProductCategoryId, UserId};

use super::{CategoryStore, CategoryStoreError, CategoryStoreResult};
use crate::model::ProductCategory;

#[derive(Debug, Default)]
pub struct InMemoryCategoryStore {
    inner: RwLock<HashMap<ProductCategoryId, ProductCategory>>,
}

impl InMemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> CategoryStoreError {
    CategoryStoreError::Backend("category store lock poisoned".into())
}

#[async_trait]
impl CategoryStore for InMemoryCategoryStore {
    async fn insert(&self, category: ProductCategory) -> CategoryStoreResult<()> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        if guard.contains_key(&category.id) {
            return Err(CategoryStoreError::Conflict(format!(
                "product category {} exists",
                category.id
            )));
        }
        guard.insert(category.id, category);
        Ok(())
    }

    async fn find(&self, id: ProductCategoryId) -> CategoryStoreResult<Option<ProductCategory>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        Ok(guard.get(&id).cloned())
    }

    async fn rename(
        &self,
        id: ProductCategoryId,
        name: &str,
        by: UserId,
        at: DateTime<Utc>,
    ) -> CategoryStoreResult<Option<ProductCategory>> {
        let mut guard = self.inner.write().map_err(|_| poisoned())?;
        Ok(guard.get_mut(&id).map(|category| {
            category.name = name.to_string();
            category.updated_at = at;
            category.updated_by = Some(by);
            category.clone()
        }))
    }

    async fn list_by_business(
        &self,
        business_id: BusinessId,
        limit: u32,
        offset: u32,
    ) -> CategoryStoreResult<Vec<ProductCategory>> {
        let guard = self.inner.read().map_err(|_| poisoned())?;
        let mut rows: Vec<ProductCategory> = guard
            .values()
            .filter(|c| c.business_id == business_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn category(business_id: BusinessId, name: &str, at: DateTime<Utc>) -> ProductCategory {
        let by = UserId::new();
        ProductCategory {
            id: ProductCategoryId::new(),
            business_id,
            name: name.into(),
            created_at: at,
            created_by: by,
            updated_at: at,
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn pages_are_scoped_and_ordered() {
        let store = InMemoryCategoryStore::new();
        let business = BusinessId::new();
        let t0 = Utc::now();
        for (i, name) in ["Drinks", "Snacks", "Dairy"].iter().enumerate() {
            store
                .insert(category(business, name, t0 + Duration::seconds(i as i64)))
                .await
                .unwrap();
        }
        store.insert(category(BusinessId::new(), "Other", t0)).await.unwrap();

        let first = store.list_by_business(business, 2, 0).await.unwrap();
        let names: Vec<_> = first.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Drinks", "Snacks"]);

        let second = store.list_by_business(business, 2, 2).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "Dairy");
    }

    #[tokio::test]
    async fn rename_stamps_the_update() {
        let store = InMemoryCategoryStore::new();
        let t0 = Utc::now();
        let original = category(BusinessId::new(), "Drinks", t0);
        store.insert(original.clone()).await.unwrap();

        let by = UserId::new();
        let later = t0 + Duration::minutes(5);
        let renamed = store.rename(original.id, "Beverages", by, later).await.unwrap().unwrap();
        assert_eq!(renamed.name, "Beverages");
        assert_eq!(renamed.updated_by, Some(by));
        assert_eq!(renamed.updated_at, later);
        assert_eq!(renamed.created_at, t0);

        assert!(store
            .rename(ProductCategoryId::new(), "Nope", by, later)
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            store.insert(original).await,
            Err(CategoryStoreError::Conflict(_))
        ));
    }
}
