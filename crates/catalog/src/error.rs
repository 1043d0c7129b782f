use thiserror::Error;

use khata_core::ValidationErrors;
use khata_infra::read_model::ReplicaStoreError;

use crate::store::CategoryStoreError;

pub type CategoryResult<T> = Result<T, CategoryError>;

/// Everything a category operation can fail with.
///
/// `Internal` carries detail for logs only; callers see the generic message.
#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("token is not scoped to a business")]
    NoBusinessSelected,

    #[error("caller is not a member of the business")]
    NotAMember,

    #[error("product category not found")]
    NotFound,

    #[error("invalid product category id")]
    InvalidCategoryId,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CategoryError {
    pub fn code(&self) -> &'static str {
        match self {
            CategoryError::Validation(_) => "validation_001",
            CategoryError::Unauthenticated => "auth_015",
            CategoryError::NoBusinessSelected => "category_001",
            CategoryError::NotAMember => "category_002",
            CategoryError::NotFound => "category_003",
            CategoryError::InvalidCategoryId => "category_004",
            CategoryError::Internal(_) => "general_001",
        }
    }

    pub fn short(&self) -> &'static str {
        match self {
            CategoryError::Validation(_) => "validation.failed",
            CategoryError::Unauthenticated => "auth.unauthenticated",
            CategoryError::NoBusinessSelected => "business.not_selected",
            CategoryError::NotAMember => "business.forbidden",
            CategoryError::NotFound => "category.not_found",
            CategoryError::InvalidCategoryId => "category.invalid_id",
            CategoryError::Internal(_) => "general.internal",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            CategoryError::Validation(_) => "Invalid request",
            CategoryError::Unauthenticated => "Authentication required",
            CategoryError::NoBusinessSelected => "Select a business first",
            CategoryError::NotAMember => "You do not have access to this business",
            CategoryError::NotFound => "Product category not found",
            CategoryError::InvalidCategoryId => "Invalid product category id",
            CategoryError::Internal(_) => "Internal server error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            CategoryError::Unauthenticated => 401,
            CategoryError::NotAMember => 403,
            CategoryError::NotFound => 404,
            CategoryError::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<ValidationErrors> for CategoryError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<CategoryStoreError> for CategoryError {
    fn from(value: CategoryStoreError) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<ReplicaStoreError> for CategoryError {
    fn from(value: ReplicaStoreError) -> Self {
        Self::Internal(value.to_string())
    }
}
