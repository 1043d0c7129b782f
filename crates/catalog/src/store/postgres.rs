//! Postgres-backed category store over `product_categories`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use khata_core::{BusinessId, ProductCategoryId, UserId};

use super::{CategoryStore, CategoryStoreError, CategoryStoreResult};
use crate::model::ProductCategory;

const COLUMNS: &str = "id, business_id, name, created_at, created_by, updated_at, updated_by";

#[derive(Debug, Clone)]
pub struct PostgresCategoryStore {
    pool: Arc<PgPool>,
}

impl PostgresCategoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl CategoryStore for PostgresCategoryStore {
    #[instrument(skip(self, category), fields(id = %category.id))]
    async fn insert(&self, category: ProductCategory) -> CategoryStoreResult<()> {
        sqlx::query(
            "INSERT INTO product_categories \
             (id, business_id, name, created_at, created_by, updated_at, updated_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::from(category.id))
        .bind(Uuid::from(category.business_id))
        .bind(&category.name)
        .bind(category.created_at)
        .bind(Uuid::from(category.created_by))
        .bind(category.updated_at)
        .bind(category.updated_by.map(Uuid::from))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_category", e))?;
        Ok(())
    }

    async fn find(&self, id: ProductCategoryId) -> CategoryStoreResult<Option<ProductCategory>> {
        let sql = format!("SELECT {COLUMNS} FROM product_categories WHERE id = $1");
        sqlx::query(&sql)
            .bind(Uuid::from(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_category", e))?
            .map(|row| category_from_row(&row))
            .transpose()
    }

    #[instrument(skip(self, name))]
    async fn rename(
        &self,
        id: ProductCategoryId,
        name: &str,
        by: UserId,
        at: DateTime<Utc>,
    ) -> CategoryStoreResult<Option<ProductCategory>> {
        let sql = format!(
            "UPDATE product_categories SET name = $2, updated_at = $3, updated_by = $4 \
             WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(id))
            .bind(name)
            .bind(at)
            .bind(Uuid::from(by))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("rename_category", e))?
            .map(|row| category_from_row(&row))
            .transpose()
    }

    async fn list_by_business(
        &self,
        business_id: BusinessId,
        limit: u32,
        offset: u32,
    ) -> CategoryStoreResult<Vec<ProductCategory>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM product_categories WHERE business_id = $1 \
             ORDER BY created_at, id LIMIT $2 OFFSET $3"
        );
        sqlx::query(&sql)
            .bind(Uuid::from(business_id))
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_categories", e))?
            .iter()
            .map(category_from_row)
            .collect()
    }
}

fn category_from_row(row: &PgRow) -> CategoryStoreResult<ProductCategory> {
    let get = |e: sqlx::Error| map_sqlx_error("decode_category", e);
    Ok(ProductCategory {
        id: ProductCategoryId::from_uuid(row.try_get("id").map_err(get)?),
        business_id: BusinessId::from_uuid(row.try_get("business_id").map_err(get)?),
        name: row.try_get("name").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(get)?),
        updated_at: row.try_get("updated_at").map_err(get)?,
        updated_by: row
            .try_get::<Option<Uuid>, _>("updated_by")
            .map_err(get)?
            .map(UserId::from_uuid),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> CategoryStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") | Some("40P01") => CategoryStoreError::Conflict(msg),
                _ => CategoryStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            CategoryStoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => CategoryStoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, DurationRound};

    use super::*;

    /// Runs against a live database only when `DATABASE_URL` is set.
    async fn store() -> Option<PostgresCategoryStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = khata_infra::db::connect(&url, 2).await.ok()?;
        khata_infra::db::apply_schema(&pool).await.ok()?;
        Some(PostgresCategoryStore::new(pool))
    }

    #[tokio::test]
    async fn categories_round_trip_through_postgres() {
        let Some(store) = store().await else {
            return;
        };
        let business_id = BusinessId::new();
        let by = UserId::new();
        let t0 = Utc::now().duration_trunc(Duration::microseconds(1)).unwrap();

        let mut ids = Vec::new();
        for (i, name) in ["Drinks", "Snacks", "Dairy"].iter().enumerate() {
            let at = t0 + Duration::seconds(i as i64);
            let category = ProductCategory {
                id: ProductCategoryId::new(),
                business_id,
                name: name.to_string(),
                created_at: at,
                created_by: by,
                updated_at: at,
                updated_by: None,
            };
            ids.push(category.id);
            store.insert(category).await.unwrap();
        }

        let page = store.list_by_business(business_id, 2, 1).await.unwrap();
        let names: Vec<_> = page.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Snacks", "Dairy"]);

        let later = t0 + Duration::minutes(1);
        let renamed = store.rename(ids[0], "Beverages", by, later).await.unwrap().unwrap();
        assert_eq!(renamed.updated_by, Some(by));
        assert_eq!(store.find(ids[0]).await.unwrap().unwrap().name, "Beverages");
        assert!(store.find(ProductCategoryId::new()).await.unwrap().is_none());
    }
}
