//! Password recovery and rotation.

use serde::Deserialize;
use tracing::{info, instrument};

use khata_core::{PasswordId, UserId, ValidationErrors};
use khata_events::{NotificationEvent, NotificationRequest, action};

use super::AccountService;
use super::account::code_notification;
use crate::error::{AccountError, AccountResult};
use crate::model::{Password, User, VerificationKind};
use crate::password::check_password_strength;
use crate::store::StoreError;
use crate::validation;

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordInput {
    pub email: String,
    pub code: String,
    pub password: String,
    pub confirm_password: String,
}

impl ResetPasswordInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validation::email("email", &self.email, &mut errors);
        validation::otp("code", &self.code, &mut errors);
        check_password_strength("password", &self.password, &mut errors);
        validation::equal("confirm_password", &self.confirm_password, &self.password, &mut errors);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordInput {
    pub current_password: String,
    pub password: String,
    pub confirm_password: String,
}

impl ChangePasswordInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validation::required("current_password", &self.current_password, &mut errors);
        check_password_strength("password", &self.password, &mut errors);
        validation::equal("confirm_password", &self.confirm_password, &self.password, &mut errors);
        errors.into_result()
    }
}

impl AccountService {
    /// Issue a password-reset code to the user's email.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, email: &str) -> AccountResult<()> {
        let mut errors = ValidationErrors::new();
        validation::email("email", email, &mut errors);
        errors.into_result()?;

        let user = self.user_by_email(&validation::normalize_email(email)).await?;
        let now = self.clock.now();
        self.check_resend_cooldown(user.id, VerificationKind::PasswordReset, now)
            .await?;

        let request = self
            .store
            .insert_verification_request(self.new_verification_request(
                user.id,
                VerificationKind::PasswordReset,
                now,
            ))
            .await?;

        self.publish_required(action::SEND, code_notification(&user, &request))
            .await
    }

    /// Set a new password using a reset code.
    #[instrument(skip_all, fields(email = %input.email))]
    pub async fn reset_password(&self, input: ResetPasswordInput) -> AccountResult<()> {
        input.validate()?;
        let user = self.user_by_email(&validation::normalize_email(&input.email)).await?;

        let now = self.clock.now();
        let request = self
            .pending_request(user.id, VerificationKind::PasswordReset, now)
            .await?;
        if request.code != input.code {
            return Err(AccountError::InvalidCode);
        }

        self.ensure_not_reused(user.id, &input.password).await?;
        let hash = self.hash_password(&input.password).await?;

        let mut tx = self.store.begin().await?;
        if !tx.consume_verification_request(request.id, now).await? {
            return Err(AccountError::VerificationExpired);
        }
        tx.retire_active_password(user.id, user.id, now).await?;
        tx.insert_password(new_password(&user, hash, now)).await?;
        tx.commit().await.map_err(|err| match err {
            StoreError::Conflict(_) => AccountError::VerificationExpired,
            other => other.into(),
        })?;

        info!(user_id = %user.id, "password reset");
        self.publish_logged(action::SEND, confirmation(&user, NotificationEvent::ResetPassword))
            .await;
        Ok(())
    }

    /// Rotate the password of an authenticated user.
    #[instrument(skip_all, fields(user_id = %initiator))]
    pub async fn change_password(
        &self,
        initiator: UserId,
        input: ChangePasswordInput,
    ) -> AccountResult<()> {
        input.validate()?;
        let user = self.user_by_id(initiator).await?;

        let active = self
            .store
            .find_active_password(user.id)
            .await?
            .ok_or(AccountError::PasswordMismatch)?;
        if !self.verify_password(&input.current_password, &active.hash).await? {
            return Err(AccountError::PasswordMismatch);
        }

        self.ensure_not_reused(user.id, &input.password).await?;
        let hash = self.hash_password(&input.password).await?;

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        tx.retire_active_password(user.id, user.id, now).await?;
        tx.insert_password(new_password(&user, hash, now)).await?;
        tx.commit().await?;

        info!(user_id = %user.id, "password changed");
        self.publish_logged(action::SEND, confirmation(&user, NotificationEvent::ChangePassword))
            .await;
        Ok(())
    }
}

fn new_password(user: &User, hash: String, now: chrono::DateTime<chrono::Utc>) -> Password {
    Password {
        id: PasswordId::new(),
        user_id: user.id,
        hash,
        created_at: now,
        created_by: user.id,
        deleted_at: None,
        deleted_by: None,
    }
}

fn confirmation(user: &User, event: NotificationEvent) -> NotificationRequest {
    NotificationRequest::p2p(event)
        .email(user.email.clone())
        .token("Name", user.name.clone())
}
