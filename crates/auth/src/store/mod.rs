//! Relational store port for the account service.
//!
//! Reads that stand alone live on [`AccountStore`]. Multi-step writes go
//! through an [`AccountTransaction`]: nothing written through it is visible to
//! other readers until `commit`, and dropping it without committing discards
//! everything.
//!
//! Store-level invariants (enforced by every implementation):
//! - email is unique among non-deleted users
//! - a user has at most one active password
//! - verification generations are unique per (user, kind) and increase

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use khata_core::{BusinessId, UserId, VerificationRequestId};

use crate::model::{
    Business, BusinessUser, Invitation, Password, Session, User, VerificationKind,
    VerificationRequest,
};

pub mod in_memory;

pub use in_memory::InMemoryAccountStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already belongs to an active user")]
    EmailTaken,

    #[error("user already has an active password")]
    ActivePasswordExists,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn AccountTransaction>>;

    /// Non-deleted user with this email.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Non-deleted user with this id.
    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_active_password(&self, user_id: UserId) -> StoreResult<Option<Password>>;

    /// Most recent `limit` password rows, newest first, active row included.
    async fn find_recent_passwords(&self, user_id: UserId, limit: usize) -> StoreResult<Vec<Password>>;

    /// Highest-generation request of `kind`, consumed or not.
    async fn find_latest_verification_request(
        &self,
        user_id: UserId,
        kind: VerificationKind,
    ) -> StoreResult<Option<VerificationRequest>>;

    /// Insert outside a transaction; the store assigns the generation.
    async fn insert_verification_request(
        &self,
        request: VerificationRequest,
    ) -> StoreResult<VerificationRequest>;

    async fn insert_session(&self, session: Session) -> StoreResult<()>;

    /// Businesses the user is an active member of.
    async fn find_businesses_by_user(&self, user_id: UserId) -> StoreResult<Vec<Business>>;

    /// The business, only if `user_id` is an active member of it.
    async fn find_member_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> StoreResult<Option<Business>>;

    async fn update_user_avatar(
        &self,
        user_id: UserId,
        avatar: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>>;

    async fn insert_invitation(&self, invitation: Invitation) -> StoreResult<()>;
}

#[async_trait]
pub trait AccountTransaction: Send {
    async fn insert_user(&mut self, user: User) -> StoreResult<()>;

    async fn insert_password(&mut self, password: Password) -> StoreResult<()>;

    /// Soft-delete the active password, if any.
    async fn retire_active_password(
        &mut self,
        user_id: UserId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// The store assigns the generation; the stored row is returned.
    async fn insert_verification_request(
        &mut self,
        request: VerificationRequest,
    ) -> StoreResult<VerificationRequest>;

    /// Mark consumed. `false` if it was already consumed (or does not exist).
    async fn consume_verification_request(
        &mut self,
        id: VerificationRequestId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Set `email_verified` or `phone_verified` and bump `updated_at`.
    async fn mark_verified(
        &mut self,
        user_id: UserId,
        kind: VerificationKind,
        at: DateTime<Utc>,
    ) -> StoreResult<User>;

    async fn insert_business(&mut self, business: Business) -> StoreResult<()>;

    async fn insert_business_user(&mut self, membership: BusinessUser) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
