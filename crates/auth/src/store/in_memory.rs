//! In-memory account store for tests/dev.
//!
//! A transaction works on a private copy of the state and records every write.
//! `commit` replays the recorded writes against the live state under one write
//! lock, re-checking every store invariant; if any write no longer applies the
//! live state is left untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use khata_core::{BusinessId, UserId, VerificationRequestId};

use super::{AccountStore, AccountTransaction, StoreError, StoreResult};
use crate::model::{
    Business, BusinessUser, Invitation, Password, Session, User, VerificationKind,
    VerificationRequest,
};

#[derive(Debug, Clone, Default)]
struct AccountState {
    users: HashMap<UserId, User>,
    passwords: Vec<Password>,
    verifications: Vec<VerificationRequest>,
    sessions: Vec<Session>,
    businesses: HashMap<BusinessId, Business>,
    memberships: HashMap<(UserId, BusinessId), BusinessUser>,
    invitations: Vec<Invitation>,
}

#[derive(Debug, Clone)]
enum Write {
    User(User),
    Password(Password),
    RetirePassword {
        user_id: UserId,
        by: UserId,
        at: DateTime<Utc>,
    },
    Verification(VerificationRequest),
    Consume {
        id: VerificationRequestId,
        at: DateTime<Utc>,
    },
    MarkVerified {
        user_id: UserId,
        kind: VerificationKind,
        at: DateTime<Utc>,
    },
    Business(Business),
    BusinessUser(BusinessUser),
}

impl AccountState {
    fn active_user_by_email(&self, email: &str) -> Option<&User> {
        self.users
            .values()
            .find(|u| !u.is_deleted() && u.email == email)
    }

    fn insert_user(&mut self, user: User) -> StoreResult<()> {
        if self.active_user_by_email(&user.email).is_some() {
            return Err(StoreError::EmailTaken);
        }
        if self.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {} exists", user.id)));
        }
        self.users.insert(user.id, user);
        Ok(())
    }

    fn insert_password(&mut self, password: Password) -> StoreResult<()> {
        if password.is_active()
            && self
                .passwords
                .iter()
                .any(|p| p.user_id == password.user_id && p.is_active())
        {
            return Err(StoreError::ActivePasswordExists);
        }
        self.passwords.push(password);
        Ok(())
    }

    fn retire_password(&mut self, user_id: UserId, by: UserId, at: DateTime<Utc>) {
        for p in self
            .passwords
            .iter_mut()
            .filter(|p| p.user_id == user_id && p.is_active())
        {
            p.deleted_at = Some(at);
            p.deleted_by = Some(by);
        }
    }

    fn latest_verification(&self, user_id: UserId, kind: VerificationKind) -> Option<&VerificationRequest> {
        self.verifications
            .iter()
            .filter(|v| v.user_id == user_id && v.kind == kind)
            .max_by_key(|v| v.generation)
    }

    fn insert_verification(&mut self, mut request: VerificationRequest) -> VerificationRequest {
        request.generation = self
            .latest_verification(request.user_id, request.kind)
            .map_or(1, |v| v.generation + 1);
        self.verifications.push(request.clone());
        request
    }

    fn consume(&mut self, id: VerificationRequestId, at: DateTime<Utc>) -> bool {
        match self
            .verifications
            .iter_mut()
            .find(|v| v.id == id && v.consumed_at.is_none())
        {
            Some(v) => {
                v.consumed_at = Some(at);
                true
            }
            None => false,
        }
    }

    fn mark_verified(&mut self, user_id: UserId, kind: VerificationKind, at: DateTime<Utc>) -> StoreResult<User> {
        let user = self
            .users
            .get_mut(&user_id)
            .filter(|u| !u.is_deleted())
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        match kind {
            VerificationKind::Email => user.email_verified = true,
            VerificationKind::Phone => user.phone_verified = true,
            VerificationKind::PasswordReset => {
                return Err(StoreError::Conflict("password reset is not a channel".into()));
            }
        }
        user.updated_at = at;
        user.updated_by = Some(user_id);
        Ok(user.clone())
    }

    fn insert_business(&mut self, business: Business) -> StoreResult<()> {
        if self.businesses.contains_key(&business.id) {
            return Err(StoreError::Conflict(format!("business {} exists", business.id)));
        }
        self.businesses.insert(business.id, business);
        Ok(())
    }

    fn insert_business_user(&mut self, membership: BusinessUser) -> StoreResult<()> {
        let key = (membership.user_id, membership.business_id);
        if self.memberships.contains_key(&key) {
            return Err(StoreError::Conflict("membership exists".into()));
        }
        self.memberships.insert(key, membership);
        Ok(())
    }

    /// Apply a recorded write during commit. Every invariant is re-checked.
    fn replay(&mut self, write: Write) -> StoreResult<()> {
        match write {
            Write::User(u) => self.insert_user(u),
            Write::Password(p) => self.insert_password(p),
            Write::RetirePassword { user_id, by, at } => {
                self.retire_password(user_id, by, at);
                Ok(())
            }
            Write::Verification(v) => {
                self.insert_verification(v);
                Ok(())
            }
            Write::Consume { id, at } => {
                if self.consume(id, at) {
                    Ok(())
                } else {
                    Err(StoreError::Conflict(format!("verification request {id} already consumed")))
                }
            }
            Write::MarkVerified { user_id, kind, at } => self.mark_verified(user_id, kind, at).map(|_| ()),
            Write::Business(b) => self.insert_business(b),
            Write::BusinessUser(m) => self.insert_business_user(m),
        }
    }
}

#[derive(Debug, Default)]
struct StoreShared {
    state: RwLock<AccountState>,
    fail_next_commit: AtomicBool,
}

/// In-memory [`AccountStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryAccountStore {
    shared: Arc<StoreShared>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `commit` fail (after all writes were staged).
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, AccountState>> {
        self.shared
            .state
            .read()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))
    }

    pub fn user_count(&self) -> usize {
        self.read().map(|s| s.users.len()).unwrap_or(0)
    }

    pub fn passwords_of(&self, user_id: UserId) -> Vec<Password> {
        self.read()
            .map(|s| s.passwords.iter().filter(|p| p.user_id == user_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn verification_requests_of(&self, user_id: UserId) -> Vec<VerificationRequest> {
        self.read()
            .map(|s| {
                s.verifications
                    .iter()
                    .filter(|v| v.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sessions_of(&self, user_id: UserId) -> Vec<Session> {
        self.read()
            .map(|s| s.sessions.iter().filter(|x| x.user_id == user_id).cloned().collect())
            .unwrap_or_default()
    }

    pub fn memberships_of(&self, user_id: UserId) -> Vec<BusinessUser> {
        self.read()
            .map(|s| {
                s.memberships
                    .values()
                    .filter(|m| m.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn invitations(&self) -> Vec<Invitation> {
        self.read().map(|s| s.invitations.clone()).unwrap_or_default()
    }

    /// Soft-delete a user (admin tooling/tests).
    pub fn delete_user(&self, user_id: UserId, by: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.edit_user(user_id, |u| {
            u.deleted_at = Some(at);
            u.deleted_by = Some(by);
        })
    }

    /// Deactivate a user (admin tooling/tests).
    pub fn deactivate_user(&self, user_id: UserId, by: UserId, at: DateTime<Utc>) -> StoreResult<()> {
        self.edit_user(user_id, |u| {
            u.deactivated_at = Some(at);
            u.deactivated_by = Some(by);
        })
    }

    fn edit_user(&self, user_id: UserId, f: impl FnOnce(&mut User)) -> StoreResult<()> {
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))?;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;
        f(user);
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn begin(&self) -> StoreResult<Box<dyn AccountTransaction>> {
        let working = self.read()?.clone();
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            working,
            writes: Vec::new(),
        }))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.read()?.active_user_by_email(email).cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn find_active_password(&self, user_id: UserId) -> StoreResult<Option<Password>> {
        Ok(self
            .read()?
            .passwords
            .iter()
            .find(|p| p.user_id == user_id && p.is_active())
            .cloned())
    }

    async fn find_recent_passwords(&self, user_id: UserId, limit: usize) -> StoreResult<Vec<Password>> {
        Ok(self
            .read()?
            .passwords
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_latest_verification_request(
        &self,
        user_id: UserId,
        kind: VerificationKind,
    ) -> StoreResult<Option<VerificationRequest>> {
        Ok(self.read()?.latest_verification(user_id, kind).cloned())
    }

    async fn insert_verification_request(
        &self,
        request: VerificationRequest,
    ) -> StoreResult<VerificationRequest> {
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))?;
        Ok(state.insert_verification(request))
    }

    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))?;
        state.sessions.push(session);
        Ok(())
    }

    async fn find_businesses_by_user(&self, user_id: UserId) -> StoreResult<Vec<Business>> {
        let state = self.read()?;
        let mut out: Vec<Business> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id && m.deleted_at.is_none())
            .filter_map(|m| state.businesses.get(&m.business_id))
            .filter(|b| b.deleted_at.is_none())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(out)
    }

    async fn find_member_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> StoreResult<Option<Business>> {
        let state = self.read()?;
        let is_member = state
            .memberships
            .get(&(user_id, business_id))
            .is_some_and(|m| m.deleted_at.is_none());
        if !is_member {
            return Ok(None);
        }
        Ok(state
            .businesses
            .get(&business_id)
            .filter(|b| b.deleted_at.is_none())
            .cloned())
    }

    async fn update_user_avatar(
        &self,
        user_id: UserId,
        avatar: Option<String>,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<User>> {
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))?;
        let Some(user) = state.users.get_mut(&user_id).filter(|u| !u.is_deleted()) else {
            return Ok(None);
        };
        user.avatar = avatar;
        user.updated_at = at;
        user.updated_by = Some(user_id);
        Ok(Some(user.clone()))
    }

    async fn insert_invitation(&self, invitation: Invitation) -> StoreResult<()> {
        let mut state = self
            .shared
            .state
            .write()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))?;
        state.invitations.push(invitation);
        Ok(())
    }
}

struct InMemoryTransaction {
    shared: Arc<StoreShared>,
    working: AccountState,
    writes: Vec<Write>,
}

#[async_trait]
impl AccountTransaction for InMemoryTransaction {
    async fn insert_user(&mut self, user: User) -> StoreResult<()> {
        self.working.insert_user(user.clone())?;
        self.writes.push(Write::User(user));
        Ok(())
    }

    async fn insert_password(&mut self, password: Password) -> StoreResult<()> {
        self.working.insert_password(password.clone())?;
        self.writes.push(Write::Password(password));
        Ok(())
    }

    async fn retire_active_password(
        &mut self,
        user_id: UserId,
        by: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.working.retire_password(user_id, by, at);
        self.writes.push(Write::RetirePassword { user_id, by, at });
        Ok(())
    }

    async fn insert_verification_request(
        &mut self,
        request: VerificationRequest,
    ) -> StoreResult<VerificationRequest> {
        let stored = self.working.insert_verification(request.clone());
        self.writes.push(Write::Verification(request));
        Ok(stored)
    }

    async fn consume_verification_request(
        &mut self,
        id: VerificationRequestId,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let consumed = self.working.consume(id, at);
        if consumed {
            self.writes.push(Write::Consume { id, at });
        }
        Ok(consumed)
    }

    async fn mark_verified(
        &mut self,
        user_id: UserId,
        kind: VerificationKind,
        at: DateTime<Utc>,
    ) -> StoreResult<User> {
        let user = self.working.mark_verified(user_id, kind, at)?;
        self.writes.push(Write::MarkVerified { user_id, kind, at });
        Ok(user)
    }

    async fn insert_business(&mut self, business: Business) -> StoreResult<()> {
        self.working.insert_business(business.clone())?;
        self.writes.push(Write::Business(business));
        Ok(())
    }

    async fn insert_business_user(&mut self, membership: BusinessUser) -> StoreResult<()> {
        self.working.insert_business_user(membership.clone())?;
        self.writes.push(Write::BusinessUser(membership));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let InMemoryTransaction { shared, writes, .. } = *self;
        if shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("injected commit failure".into()));
        }

        let mut live = shared
            .state
            .write()
            .map_err(|_| StoreError::Backend("account store lock poisoned".into()))?;

        let mut next = live.clone();
        for write in writes {
            next.replay(write)?;
        }
        *live = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
