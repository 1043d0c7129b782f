//! Registration, verification, login and profile operations.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use khata_core::{PasswordId, UserId, ValidationErrors};
use khata_events::{NotificationEvent, NotificationRequest, action};

use super::{AccountService, ClientInfo, LoginOutcome, format_expiry};
use crate::crypto::human_id;
use crate::error::{AccountError, AccountResult};
use crate::model::{Password, USER_ID_PREFIX, User, VerificationKind, VerificationRequest};
use crate::password::check_password_strength;
use crate::store::StoreError;
use crate::validation;

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInput {
    pub name: String,
    pub email: String,
    pub country_code: String,
    pub phone: String,
    pub password: String,
}

impl RegisterInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validation::person_name("name", &self.name, &mut errors);
        validation::email("email", &self.email, &mut errors);
        validation::country_code("country_code", &self.country_code, &mut errors);
        validation::phone("phone", &self.phone, &mut errors);
        check_password_strength("password", &self.password, &mut errors);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyInput {
    pub email: String,
    pub code: String,
}

impl VerifyInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validation::email("email", &self.email, &mut errors);
        validation::otp("code", &self.code, &mut errors);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

/// What a user sees about themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: UserId,
    pub human_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub avatar: Option<String>,
}

impl From<User> for Profile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            human_id: user.human_id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            avatar: user.avatar,
        }
    }
}

fn email_only(email: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    validation::email("email", email, &mut errors);
    errors.into_result()
}

impl AccountService {
    /// Create an unverified user with its first password and one pending code
    /// per channel.
    #[instrument(skip_all, fields(email = %input.email))]
    pub async fn register(&self, input: RegisterInput) -> AccountResult<User> {
        input.validate()?;
        let email = validation::normalize_email(&input.email);

        if self.store.find_user_by_email(&email).await?.is_some() {
            return Err(AccountError::UserExists);
        }

        let hash = self.hash_password(&input.password).await?;
        let now = self.clock.now();
        let user = User {
            id: UserId::new(),
            human_id: human_id(USER_ID_PREFIX),
            name: input.name.trim().to_string(),
            email,
            phone: validation::full_phone(&input.country_code, &input.phone),
            avatar: None,
            email_verified: false,
            phone_verified: false,
            created_at: now,
            created_by: UserId::root(),
            updated_at: now,
            updated_by: None,
            deactivated_at: None,
            deactivated_by: None,
            deleted_at: None,
            deleted_by: None,
        };
        let password = Password {
            id: PasswordId::new(),
            user_id: user.id,
            hash,
            created_at: now,
            created_by: UserId::root(),
            deleted_at: None,
            deleted_by: None,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_user(user.clone()).await?;
        tx.insert_password(password).await?;
        let email_code = tx
            .insert_verification_request(self.new_verification_request(user.id, VerificationKind::Email, now))
            .await?;
        let phone_code = tx
            .insert_verification_request(self.new_verification_request(user.id, VerificationKind::Phone, now))
            .await?;
        tx.commit().await?;

        info!(user_id = %user.id, "user registered");

        self.publish_logged(action::CREATE, user.snapshot()).await;
        self.publish_logged(action::SEND, code_notification(&user, &email_code)).await;
        self.publish_logged(action::SEND, code_notification(&user, &phone_code)).await;

        Ok(user)
    }

    /// Issue a fresh email code (subject to the resend cooldown).
    #[instrument(skip(self))]
    pub async fn send_email_verification(&self, email: &str) -> AccountResult<()> {
        self.send_verification(email, VerificationKind::Email).await
    }

    /// Issue a fresh phone code (subject to the resend cooldown).
    #[instrument(skip(self))]
    pub async fn send_phone_verification(&self, email: &str) -> AccountResult<()> {
        self.send_verification(email, VerificationKind::Phone).await
    }

    async fn send_verification(&self, email: &str, kind: VerificationKind) -> AccountResult<()> {
        email_only(email)?;
        let user = self.user_by_email(&validation::normalize_email(email)).await?;

        match kind {
            VerificationKind::Email if user.email_verified => return Err(AccountError::EmailAlreadyVerified),
            VerificationKind::Phone if user.phone_verified => return Err(AccountError::PhoneAlreadyVerified),
            _ => {}
        }

        let now = self.clock.now();
        self.check_resend_cooldown(user.id, kind, now).await?;

        let request = self
            .store
            .insert_verification_request(self.new_verification_request(user.id, kind, now))
            .await?;

        self.publish_required(action::SEND, code_notification(&user, &request)).await
    }

    #[instrument(skip_all, fields(email = %input.email))]
    pub async fn verify_email(&self, input: VerifyInput) -> AccountResult<User> {
        let user = self.verify_channel(input, VerificationKind::Email).await?;

        let confirmation = NotificationRequest::p2p(NotificationEvent::EmailVerified)
            .email(user.email.clone())
            .token("Name", user.name.clone());
        self.publish_logged(action::SEND, confirmation).await;

        Ok(user)
    }

    #[instrument(skip_all, fields(email = %input.email))]
    pub async fn verify_phone(&self, input: VerifyInput) -> AccountResult<User> {
        self.verify_channel(input, VerificationKind::Phone).await
    }

    async fn verify_channel(&self, input: VerifyInput, kind: VerificationKind) -> AccountResult<User> {
        input.validate()?;
        let user = self.user_by_email(&validation::normalize_email(&input.email)).await?;

        let now = self.clock.now();
        let request = self.pending_request(user.id, kind, now).await?;
        if request.code != input.code {
            return Err(AccountError::InvalidCode);
        }

        let mut tx = self.store.begin().await?;
        if !tx.consume_verification_request(request.id, now).await? {
            return Err(AccountError::VerificationExpired);
        }
        let updated = tx.mark_verified(user.id, kind, now).await?;
        tx.commit().await.map_err(|err| match err {
            // Someone else consumed the same code first.
            StoreError::Conflict(_) => AccountError::VerificationExpired,
            other => other.into(),
        })?;

        info!(user_id = %updated.id, kind = kind.as_str(), "channel verified");
        self.publish_logged(action::UPDATE, updated.snapshot()).await;
        Ok(updated)
    }

    /// Authenticate and open a session.
    ///
    /// Checks run in a fixed order: existence, email verified, phone verified,
    /// not deactivated, has a password, password matches. A user with exactly
    /// one business gets a token scoped to it.
    #[instrument(skip_all, fields(email = %input.email))]
    pub async fn login(&self, input: LoginInput, client: ClientInfo) -> AccountResult<LoginOutcome> {
        let mut errors = ValidationErrors::new();
        validation::email("email", &input.email, &mut errors);
        validation::required("password", &input.password, &mut errors);
        errors.into_result()?;

        let user = self.user_by_email(&validation::normalize_email(&input.email)).await?;
        if !user.email_verified {
            return Err(AccountError::EmailNotVerified);
        }
        if !user.phone_verified {
            return Err(AccountError::PhoneNotVerified);
        }
        if user.is_deactivated() {
            return Err(AccountError::UserDeactivated);
        }

        let active = self
            .store
            .find_active_password(user.id)
            .await?
            .ok_or(AccountError::InvalidLoginMethod)?;
        if !self.verify_password(&input.password, &active.hash).await? {
            return Err(AccountError::InvalidCredentials);
        }

        let businesses = self.store.find_businesses_by_user(user.id).await?;
        let scope = match businesses.as_slice() {
            [only] => Some(only),
            _ => None,
        };

        let outcome = self.open_session(&user, scope, &client).await?;
        info!(user_id = %user.id, business_found = outcome.business_found, "user logged in");
        Ok(outcome)
    }

    pub async fn profile(&self, initiator: UserId) -> AccountResult<Profile> {
        Ok(self.user_by_id(initiator).await?.into())
    }

    /// Replace (or clear) the avatar reference and republish the user.
    #[instrument(skip(self))]
    pub async fn update_avatar(&self, initiator: UserId, avatar: Option<String>) -> AccountResult<Profile> {
        if let Some(url) = avatar.as_deref() {
            let mut errors = ValidationErrors::new();
            validation::http_url("avatar", url, &mut errors);
            errors.into_result()?;
        }

        let now = self.clock.now();
        let user = self
            .store
            .update_user_avatar(initiator, avatar, now)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        self.publish_logged(action::UPDATE, user.snapshot()).await;
        Ok(user.into())
    }
}

/// Notification carrying a one-time code to the channel matching its kind.
pub(super) fn code_notification(user: &User, request: &VerificationRequest) -> NotificationRequest {
    let base = match request.kind {
        VerificationKind::Email => {
            NotificationRequest::p2p(NotificationEvent::EmailVerification).email(user.email.clone())
        }
        VerificationKind::Phone => {
            NotificationRequest::p2p(NotificationEvent::PhoneVerification).sms(user.phone.clone())
        }
        VerificationKind::PasswordReset => {
            NotificationRequest::p2p(NotificationEvent::ForgotPassword).email(user.email.clone())
        }
    };
    base.token("Name", user.name.clone())
        .token("OTP", request.code.clone())
        .token("ExpiresAt", format_expiry(request.expires_at))
}
