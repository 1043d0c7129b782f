//! Records owned by the account service.
//!
//! Nothing here is ever hard-deleted; removal is a `deleted_at`/`deleted_by`
//! pair. Snapshot conversions produce the payloads published on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use khata_core::{
    BusinessId, InvitationId, PasswordId, SessionId, UserId, VerificationRequestId,
};
use khata_events::{BusinessSnapshot, BusinessUserSnapshot, Industry, UserSnapshot};

pub const USER_ID_PREFIX: &str = "user";
pub const SESSION_ID_PREFIX: &str = "session";
pub const OWNER_ROLE: &str = "Owner";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub human_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub avatar: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_deactivated(&self) -> bool {
        self.deactivated_at.is_some()
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            human_id: self.human_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            avatar: self.avatar.clone(),
            email_verified: self.email_verified,
            phone_verified: self.phone_verified,
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
            deactivated_at: self.deactivated_at,
            deactivated_by: self.deactivated_by,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
        }
    }
}

/// One entry of a user's password history. At most one per user is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Password {
    pub id: PasswordId,
    pub user_id: UserId,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl Password {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Email,
    Phone,
    PasswordReset,
}

impl VerificationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            VerificationKind::Email => "email",
            VerificationKind::Phone => "phone",
            VerificationKind::PasswordReset => "password_reset",
        }
    }
}

impl core::str::FromStr for VerificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(VerificationKind::Email),
            "phone" => Ok(VerificationKind::Phone),
            "password_reset" => Ok(VerificationKind::PasswordReset),
            other => Err(format!("unknown verification kind: {other}")),
        }
    }
}

/// A one-time code sent to the user.
///
/// `generation` increases per (user, kind); only the highest unconsumed,
/// unexpired generation is ever checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub id: VerificationRequestId,
    pub user_id: UserId,
    pub kind: VerificationKind,
    pub code: String,
    pub generation: i64,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl VerificationRequest {
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.consumed_at.is_none() && self.expires_at > now
    }
}

/// Immutable login record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub human_id: String,
    pub user_id: UserId,
    pub business_id: Option<BusinessId>,
    pub user_ip: String,
    pub user_agent: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub description: Option<String>,
    pub logo: Option<String>,
    pub industry: Industry,
    pub primary_currency: String,
    pub currencies: Vec<String>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl Business {
    pub fn snapshot(&self) -> BusinessSnapshot {
        BusinessSnapshot {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            logo: self.logo.clone(),
            industry: self.industry,
            primary_currency: self.primary_currency.clone(),
            currencies: self.currencies.clone(),
            owner_id: self.owner_id,
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
        }
    }
}

/// Membership of a user in a business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessUser {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<UserId>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

impl BusinessUser {
    pub fn snapshot(&self) -> BusinessUserSnapshot {
        BusinessUserSnapshot {
            user_id: self.user_id,
            business_id: self.business_id,
            role: self.role.clone(),
            created_at: self.created_at,
            created_by: self.created_by,
            updated_at: self.updated_at,
            updated_by: self.updated_by,
            deleted_at: self.deleted_at,
            deleted_by: self.deleted_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub id: InvitationId,
    pub business_id: BusinessId,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn consumed_or_expired_requests_are_not_pending() {
        let now = Utc::now();
        let mut req = VerificationRequest {
            id: VerificationRequestId::new(),
            user_id: UserId::new(),
            kind: VerificationKind::Email,
            code: "123456".into(),
            generation: 1,
            expires_at: now + Duration::minutes(15),
            consumed_at: None,
            created_at: now,
        };
        assert!(req.is_pending(now));
        assert!(!req.is_pending(now + Duration::minutes(15)));

        req.consumed_at = Some(now);
        assert!(!req.is_pending(now));
    }

    #[test]
    fn verification_kind_strings_round_trip() {
        for kind in [
            VerificationKind::Email,
            VerificationKind::Phone,
            VerificationKind::PasswordReset,
        ] {
            assert_eq!(kind.as_str().parse::<VerificationKind>().unwrap(), kind);
        }
    }
}
