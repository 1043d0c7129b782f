//! Account service error model.
//!
//! A closed set of failure kinds. Each kind carries a stable machine code, a
//! short dotted name, a human message and an HTTP status hint. Infrastructure
//! failures collapse into `Internal`; their detail is logged, never returned.

use thiserror::Error;

use khata_core::ValidationErrors;

use crate::password::HashError;
use crate::store::StoreError;
use crate::token::TokenError;

pub type AccountResult<T> = Result<T, AccountError>;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("user already exists")]
    UserExists,

    #[error("user not found")]
    UserNotFound,

    #[error("verification request expired")]
    VerificationExpired,

    #[error("invalid verification code")]
    InvalidCode,

    #[error("email not verified")]
    EmailNotVerified,

    #[error("phone not verified")]
    PhoneNotVerified,

    #[error("user deactivated")]
    UserDeactivated,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid login method")]
    InvalidLoginMethod,

    #[error("email already verified")]
    EmailAlreadyVerified,

    #[error("too many requests")]
    TooManyRequests,

    #[error("phone already verified")]
    PhoneAlreadyVerified,

    #[error("password already used")]
    PasswordAlreadyUsed,

    #[error("password mismatch")]
    PasswordMismatch,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("business not found")]
    BusinessNotFound,

    #[error("invalid business id")]
    InvalidBusinessId,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AccountError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::Validation(_) => "validation_001",
            AccountError::UserExists => "auth_001",
            AccountError::UserNotFound => "auth_002",
            AccountError::VerificationExpired => "auth_003",
            AccountError::InvalidCode => "auth_004",
            AccountError::EmailNotVerified => "auth_005",
            AccountError::PhoneNotVerified => "auth_006",
            AccountError::UserDeactivated => "auth_007",
            AccountError::InvalidCredentials => "auth_008",
            AccountError::InvalidLoginMethod => "auth_009",
            AccountError::EmailAlreadyVerified => "auth_010",
            AccountError::TooManyRequests => "auth_011",
            AccountError::PhoneAlreadyVerified => "auth_012",
            AccountError::PasswordAlreadyUsed => "auth_013",
            AccountError::PasswordMismatch => "auth_014",
            AccountError::Unauthenticated => "auth_015",
            AccountError::BusinessNotFound => "business_001",
            AccountError::InvalidBusinessId => "business_002",
            AccountError::Internal(_) => "general_001",
        }
    }

    /// Short dotted name, e.g. `user.exists`.
    pub fn short(&self) -> &'static str {
        match self {
            AccountError::Validation(_) => "validation.failed",
            AccountError::UserExists => "user.exists",
            AccountError::UserNotFound => "user.not_found",
            AccountError::VerificationExpired => "verification.expired",
            AccountError::InvalidCode => "verification.invalid_code",
            AccountError::EmailNotVerified => "email.not_verified",
            AccountError::PhoneNotVerified => "phone.not_verified",
            AccountError::UserDeactivated => "user.deactivated",
            AccountError::InvalidCredentials => "credentials.invalid",
            AccountError::InvalidLoginMethod => "login.invalid_method",
            AccountError::EmailAlreadyVerified => "email.already_verified",
            AccountError::TooManyRequests => "request.too_many",
            AccountError::PhoneAlreadyVerified => "phone.already_verified",
            AccountError::PasswordAlreadyUsed => "password.already_used",
            AccountError::PasswordMismatch => "password.mismatch",
            AccountError::Unauthenticated => "auth.unauthenticated",
            AccountError::BusinessNotFound => "business.not_found",
            AccountError::InvalidBusinessId => "business.invalid_id",
            AccountError::Internal(_) => "internal",
        }
    }

    /// Client-facing message. Never includes internal detail.
    pub fn message(&self) -> &'static str {
        match self {
            AccountError::Validation(_) => "Invalid request",
            AccountError::UserExists => "User already exists",
            AccountError::UserNotFound => "User not found",
            AccountError::VerificationExpired => "Verification request expired",
            AccountError::InvalidCode => "Invalid verification code",
            AccountError::EmailNotVerified => "Email is not verified",
            AccountError::PhoneNotVerified => "Phone is not verified",
            AccountError::UserDeactivated => "User is deactivated",
            AccountError::InvalidCredentials => "Invalid credentials",
            AccountError::InvalidLoginMethod => "Invalid login method",
            AccountError::EmailAlreadyVerified => "Email is already verified",
            AccountError::TooManyRequests => "Too many requests, try again later",
            AccountError::PhoneAlreadyVerified => "Phone is already verified",
            AccountError::PasswordAlreadyUsed => "Password was used recently",
            AccountError::PasswordMismatch => "Current password does not match",
            AccountError::Unauthenticated => "Authentication required",
            AccountError::BusinessNotFound => "Business not found",
            AccountError::InvalidBusinessId => "Invalid business id",
            AccountError::Internal(_) => "Internal server error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AccountError::UserExists => 409,
            AccountError::UserNotFound | AccountError::BusinessNotFound => 404,
            AccountError::TooManyRequests => 429,
            AccountError::Unauthenticated => 401,
            AccountError::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<ValidationErrors> for AccountError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for AccountError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::EmailTaken => Self::UserExists,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<HashError> for AccountError {
    fn from(value: HashError) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<TokenError> for AccountError {
    fn from(value: TokenError) -> Self {
        Self::Internal(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses() {
        assert_eq!(AccountError::UserExists.code(), "auth_001");
        assert_eq!(AccountError::UserExists.short(), "user.exists");
        assert_eq!(AccountError::UserExists.http_status(), 409);
        assert_eq!(AccountError::TooManyRequests.http_status(), 429);
        assert_eq!(AccountError::BusinessNotFound.code(), "business_001");
        assert_eq!(AccountError::InvalidCode.http_status(), 400);
    }

    #[test]
    fn internal_detail_is_not_in_the_client_message() {
        let err = AccountError::internal("connection refused on 10.0.0.3");
        assert_eq!(err.message(), "Internal server error");
        assert!(err.to_string().contains("10.0.0.3"));
    }

    #[test]
    fn email_conflict_from_store_is_user_exists() {
        let err: AccountError = StoreError::EmailTaken.into();
        assert!(matches!(err, AccountError::UserExists));
    }
}
