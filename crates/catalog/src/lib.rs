//! `khata-catalog`: the product service.
//!
//! - [`model`]: product categories and their inputs
//! - [`error`]: the closed error set with response metadata
//! - [`store`]: category persistence (in-memory, Postgres)
//! - [`service`]: create / rename / list, gated on business membership
//! - [`http`]: the axum surface
//!
//! Membership checks read the replicas kept by `khata_infra::replicas`.

pub mod error;
pub mod http;
pub mod model;
pub mod service;
pub mod store;

pub use error::{CategoryError, CategoryResult};
pub use model::{
    CategoryInput, CategorySummary, DEFAULT_PAGE_LIMIT, MAX_NAME_LEN, MAX_PAGE_LIMIT,
    MIN_NAME_LEN, Page, PageQuery, ProductCategory,
};
pub use service::{Caller, CategoryService};
pub use store::{
    CategoryStore, CategoryStoreError, CategoryStoreResult, InMemoryCategoryStore,
    PostgresCategoryStore,
};
