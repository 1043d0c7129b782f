use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use khata_core::{BusinessId, ProductCategoryId, UserId, ValidationErrors};

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 100;
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// A product category, scoped to one business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductCategory {
    pub id: ProductCategoryId,
    pub business_id: BusinessId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
}

/// What callers get back: `{id, name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub id: ProductCategoryId,
    pub name: String,
}

impl From<ProductCategory> for CategorySummary {
    fn from(category: ProductCategory) -> Self {
        Self {
            id: category.id,
            name: category.name,
        }
    }
}

/// Body of create and rename.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryInput {
    pub name: String,
}

impl CategoryInput {
    /// The trimmed name, or the failed rules.
    pub fn validate(&self) -> Result<String, ValidationErrors> {
        let name = self.name.trim();
        let len = name.chars().count();
        let mut errors = ValidationErrors::new();
        if name.is_empty() {
            errors.add("name", "required");
        } else if len < MIN_NAME_LEN {
            errors.add_with_param("name", "min", MIN_NAME_LEN);
        } else if len > MAX_NAME_LEN {
            errors.add_with_param("name", "max", MAX_NAME_LEN);
        }
        errors.into_result().map(|()| name.to_string())
    }
}

/// `?page=&limit=` as sent by clients; both optional.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// A resolved 1-based page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl PageQuery {
    pub fn resolve(&self) -> Result<Page, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let page = self.page.unwrap_or(1);
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if page == 0 {
            errors.add_with_param("page", "min", 1);
        }
        if limit == 0 {
            errors.add_with_param("limit", "min", 1);
        } else if limit > MAX_PAGE_LIMIT {
            errors.add_with_param("limit", "max", MAX_PAGE_LIMIT);
        }
        errors.into_result().map(|()| Page { page, limit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> Result<String, ValidationErrors> {
        CategoryInput { name: raw.into() }.validate()
    }

    #[test]
    fn names_are_trimmed_and_bounded() {
        assert_eq!(name("  Bakery ").unwrap(), "Bakery");
        assert_eq!(name("   ").unwrap_err().fields()[0].code, "required");
        assert_eq!(name(" ab ").unwrap_err().fields()[0].code, "min");
        assert_eq!(name(&"x".repeat(MAX_NAME_LEN + 1)).unwrap_err().fields()[0].code, "max");
        assert!(name(&"x".repeat(MAX_NAME_LEN)).is_ok());
    }

    #[test]
    fn pages_default_and_reject_out_of_range() {
        let page = PageQuery::default().resolve().unwrap();
        assert_eq!(page, Page { page: 1, limit: DEFAULT_PAGE_LIMIT });
        assert_eq!(page.offset(), 0);

        let third = PageQuery { page: Some(3), limit: Some(20) }.resolve().unwrap();
        assert_eq!(third.offset(), 40);

        let errors = PageQuery { page: Some(0), limit: Some(MAX_PAGE_LIMIT + 1) }
            .resolve()
            .unwrap_err();
        assert!(errors.has("page"));
        assert!(errors.has("limit"));
    }
}
