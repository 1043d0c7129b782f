//! Account lifecycle service.
//!
//! Every mutating operation follows the same shape:
//! validate input, read what it needs, perform all writes in one store
//! transaction, commit, and only then publish events. A failure before commit
//! publishes nothing.
//!
//! Publish failures after commit do not undo the commit. Snapshot events
//! (`manage-user`, `manage-business`, `manage-business-user`) are logged and the
//! request still succeeds; notification requests the caller depends on (a
//! freshly issued code) fail the request so the client can retry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, warn};

use khata_core::{BusinessId, Clock, SessionId, UserId, VerificationRequestId};
use khata_events::{CatalogEvent, EventEnvelope, EventPublisher};

use crate::crypto::{generate_otp, generate_refresh_token, human_id};
use crate::error::{AccountError, AccountResult};
use crate::model::{Business, SESSION_ID_PREFIX, Session, User, VerificationKind, VerificationRequest};
use crate::password::PasswordHasher;
use crate::store::AccountStore;
use crate::token::{TokenIssuer, TokenSubject};

pub mod account;
pub mod business;
pub mod password;
pub mod side_tasks;

pub use account::{LoginInput, Profile, RegisterInput, VerifyInput};
pub use business::{BusinessSummary, CreateBusinessInput, InviteInput, parse_business_id};
pub use password::{ChangePasswordInput, ResetPasswordInput};
pub use side_tasks::SideTasks;

/// Tunables of the account lifecycle.
#[derive(Debug, Clone)]
pub struct AccountPolicy {
    pub verification_ttl: Duration,
    /// Minimum age of the latest unconsumed code before another may be issued.
    pub resend_cooldown: Duration,
    pub session_ttl: Duration,
    pub invitation_ttl: Duration,
    /// How many recent passwords a new password may not repeat.
    pub password_history: usize,
    pub side_task_timeout: std::time::Duration,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            verification_ttl: Duration::minutes(15),
            resend_cooldown: Duration::minutes(1),
            session_ttl: Duration::days(30),
            invitation_ttl: Duration::days(15),
            password_history: 4,
            side_task_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Caller network details recorded on sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

/// Tokens handed out by login and business selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginOutcome {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub business_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<BusinessId>,
}

pub struct AccountService {
    store: Arc<dyn AccountStore>,
    publisher: EventPublisher,
    hasher: Arc<dyn PasswordHasher>,
    tokens: TokenIssuer,
    clock: Arc<dyn Clock>,
    policy: AccountPolicy,
    side_tasks: SideTasks,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        publisher: EventPublisher,
        hasher: Arc<dyn PasswordHasher>,
        tokens: TokenIssuer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_policy(store, publisher, hasher, tokens, clock, AccountPolicy::default())
    }

    pub fn with_policy(
        store: Arc<dyn AccountStore>,
        publisher: EventPublisher,
        hasher: Arc<dyn PasswordHasher>,
        tokens: TokenIssuer,
        clock: Arc<dyn Clock>,
        policy: AccountPolicy,
    ) -> Self {
        let side_tasks = SideTasks::new(policy.side_task_timeout);
        Self {
            store,
            publisher,
            hasher,
            tokens,
            clock,
            policy,
            side_tasks,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn policy(&self) -> &AccountPolicy {
        &self.policy
    }

    pub fn side_tasks(&self) -> &SideTasks {
        &self.side_tasks
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// bcrypt is CPU-bound; keep it off the async workers.
    async fn hash_password(&self, password: &str) -> AccountResult<String> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AccountError::internal(format!("hash task failed: {e}")))?
            .map_err(AccountError::from)
    }

    async fn verify_password(&self, password: &str, hash: &str) -> AccountResult<bool> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AccountError::internal(format!("verify task failed: {e}")))?
            .map_err(AccountError::from)
    }

    /// Publish after commit; a failure is logged and swallowed.
    async fn publish_logged<E: CatalogEvent>(&self, action: &str, data: E) {
        let envelope = EventEnvelope::new(action, data);
        if let Err(err) = self.publisher.publish(&envelope).await {
            error!(
                topic = E::KIND.topic(),
                event_id = %envelope.id(),
                error = %err,
                "event not published after commit"
            );
        }
    }

    /// Publish after commit; a failure fails the request.
    async fn publish_required<E: CatalogEvent>(&self, action: &str, data: E) -> AccountResult<()> {
        let envelope = EventEnvelope::new(action, data);
        self.publisher.publish(&envelope).await.map_err(|err| {
            error!(topic = E::KIND.topic(), event_id = %envelope.id(), error = %err, "event not published");
            AccountError::internal(err.to_string())
        })
    }

    async fn user_by_email(&self, email: &str) -> AccountResult<User> {
        self.store
            .find_user_by_email(email)
            .await?
            .ok_or(AccountError::UserNotFound)
    }

    async fn user_by_id(&self, id: UserId) -> AccountResult<User> {
        self.store
            .find_user_by_id(id)
            .await?
            .ok_or(AccountError::UserNotFound)
    }

    fn new_verification_request(
        &self,
        user_id: UserId,
        kind: VerificationKind,
        now: DateTime<Utc>,
    ) -> VerificationRequest {
        VerificationRequest {
            id: VerificationRequestId::new(),
            user_id,
            kind,
            code: generate_otp(),
            generation: 0,
            expires_at: now + self.policy.verification_ttl,
            consumed_at: None,
            created_at: now,
        }
    }

    /// Reject a new code while the latest unconsumed one is younger than the cooldown.
    async fn check_resend_cooldown(
        &self,
        user_id: UserId,
        kind: VerificationKind,
        now: DateTime<Utc>,
    ) -> AccountResult<()> {
        let latest = self
            .store
            .find_latest_verification_request(user_id, kind)
            .await?;
        if let Some(latest) = latest {
            if latest.consumed_at.is_none() && latest.created_at + self.policy.resend_cooldown > now {
                return Err(AccountError::TooManyRequests);
            }
        }
        Ok(())
    }

    /// The request a submitted code is checked against, if it is still usable.
    async fn pending_request(
        &self,
        user_id: UserId,
        kind: VerificationKind,
        now: DateTime<Utc>,
    ) -> AccountResult<VerificationRequest> {
        self.store
            .find_latest_verification_request(user_id, kind)
            .await?
            .filter(|r| r.is_pending(now))
            .ok_or(AccountError::VerificationExpired)
    }

    /// Issue an access token and refresh token and persist the session.
    async fn open_session(
        &self,
        user: &User,
        business: Option<&Business>,
        client: &ClientInfo,
    ) -> AccountResult<LoginOutcome> {
        let now = self.clock.now();
        let subject = TokenSubject {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            avatar: user.avatar.clone(),
            business_id: business.map(|b| b.id),
        };
        let access = self.tokens.issue(&subject, now)?;

        let session = Session {
            id: SessionId::new(),
            human_id: human_id(SESSION_ID_PREFIX),
            user_id: user.id,
            business_id: subject.business_id,
            user_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            refresh_token: generate_refresh_token(),
            expires_at: now + self.policy.session_ttl,
            created_at: now,
            created_by: user.id,
        };
        let outcome = LoginOutcome {
            access_token: access.token,
            access_token_expires_at: access.expires_at,
            refresh_token: session.refresh_token.clone(),
            refresh_token_expires_at: session.expires_at,
            business_found: business.is_some(),
            business_id: subject.business_id,
        };

        self.store.insert_session(session).await?;
        Ok(outcome)
    }

    /// `PasswordAlreadyUsed` if `candidate` matches any of the recent passwords.
    async fn ensure_not_reused(&self, user_id: UserId, candidate: &str) -> AccountResult<()> {
        let recent = self
            .store
            .find_recent_passwords(user_id, self.policy.password_history)
            .await?;
        for previous in recent {
            match self.verify_password(candidate, &previous.hash).await {
                Ok(true) => return Err(AccountError::PasswordAlreadyUsed),
                Ok(false) => {}
                Err(err) => warn!(user_id = %user_id, error = %err, "unreadable password hash in history"),
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AccountService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

pub(crate) fn format_expiry(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
