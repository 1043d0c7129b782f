//! Business creation, listing, selection and invitations.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use khata_core::{BusinessId, InvitationId, UserId, ValidationErrors};
use khata_events::{
    EventEnvelope, Industry, NotificationEvent, NotificationRequest, action,
};

use super::{AccountService, ClientInfo, LoginOutcome, format_expiry};
use crate::crypto::generate_invitation_hash;
use crate::error::{AccountError, AccountResult};
use crate::model::{Business, BusinessUser, Invitation, OWNER_ROLE};
use crate::validation;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBusinessInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    pub industry: String,
    pub primary_currency: String,
    pub currencies: Vec<String>,
}

impl CreateBusinessInput {
    /// Validate and return the parsed industry.
    pub fn validate(&self) -> Result<Industry, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if validation::required("name", &self.name, &mut errors) {
            validation::length("name", self.name.trim(), validation::NAME_MIN, validation::NAME_MAX, &mut errors);
        }
        if let Some(description) = &self.description {
            validation::length(
                "description",
                description,
                validation::DESCRIPTION_MIN,
                validation::DESCRIPTION_MAX,
                &mut errors,
            );
        }
        if let Some(logo) = &self.logo {
            validation::http_url("logo", logo, &mut errors);
        }

        let industry = self.industry.parse::<Industry>().ok();
        if industry.is_none() {
            let allowed: Vec<&str> = Industry::ALL.iter().map(|i| i.as_str()).collect();
            errors.add_with_param("industry", "oneof", allowed.join(" "));
        }

        validation::currency("primary_currency", &self.primary_currency, &mut errors);
        if self.currencies.is_empty() {
            errors.add("currencies", "required");
        }
        for code in &self.currencies {
            validation::currency("currencies", code, &mut errors);
        }

        match industry {
            Some(industry) if errors.is_empty() => Ok(industry),
            _ => Err(errors),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusinessSummary {
    pub id: BusinessId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteInput {
    pub name: String,
    pub email: String,
    pub country_code: String,
    pub phone: String,
    /// Base URL the invitation link points at, e.g. `https://app.example.com`.
    pub origin: String,
}

impl InviteInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        validation::person_name("name", &self.name, &mut errors);
        validation::email("email", &self.email, &mut errors);
        validation::country_code("country_code", &self.country_code, &mut errors);
        validation::phone("phone", &self.phone, &mut errors);
        validation::http_url("origin", &self.origin, &mut errors);
        errors.into_result()
    }
}

/// Parse a business id supplied by a client.
pub fn parse_business_id(raw: &str) -> AccountResult<BusinessId> {
    raw.trim()
        .parse::<BusinessId>()
        .map_err(|_| AccountError::InvalidBusinessId)
}

impl AccountService {
    /// Create a business owned by `initiator`, with its owner membership.
    #[instrument(skip_all, fields(user_id = %initiator, name = %input.name))]
    pub async fn create_business(
        &self,
        initiator: UserId,
        input: CreateBusinessInput,
    ) -> AccountResult<Business> {
        let industry = input.validate()?;
        let owner = self.user_by_id(initiator).await?;

        let now = self.clock.now();
        let business = Business {
            id: BusinessId::new(),
            name: input.name.trim().to_string(),
            description: input.description,
            logo: input.logo,
            industry,
            primary_currency: input.primary_currency,
            currencies: input.currencies,
            owner_id: owner.id,
            created_at: now,
            created_by: owner.id,
            updated_at: now,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        };
        let membership = BusinessUser {
            user_id: owner.id,
            business_id: business.id,
            role: OWNER_ROLE.to_string(),
            created_at: now,
            created_by: owner.id,
            updated_at: now,
            updated_by: None,
            deleted_at: None,
            deleted_by: None,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_business(business.clone()).await?;
        tx.insert_business_user(membership.clone()).await?;
        tx.commit().await?;

        info!(business_id = %business.id, "business created");
        self.publish_logged(action::CREATE, business.snapshot()).await;
        self.publish_logged(action::CREATE, membership.snapshot()).await;

        Ok(business)
    }

    pub async fn list_businesses(&self, initiator: UserId) -> AccountResult<Vec<BusinessSummary>> {
        Ok(self
            .store
            .find_businesses_by_user(initiator)
            .await?
            .into_iter()
            .map(|b| BusinessSummary { id: b.id, name: b.name })
            .collect())
    }

    /// Re-issue tokens scoped to a business the initiator belongs to.
    #[instrument(skip(self, client))]
    pub async fn select_business(
        &self,
        initiator: UserId,
        business_id: BusinessId,
        client: ClientInfo,
    ) -> AccountResult<LoginOutcome> {
        let user = self.user_by_id(initiator).await?;
        let business = self
            .store
            .find_member_business(user.id, business_id)
            .await?
            .ok_or(AccountError::BusinessNotFound)?;

        self.open_session(&user, Some(&business), &client).await
    }

    /// Record an invitation and notify the invitee in the background.
    ///
    /// The notification is a side task: its outcome never changes the result
    /// of this call.
    #[instrument(skip_all, fields(user_id = %initiator, business_id = %business_id))]
    pub async fn invite_user(
        &self,
        initiator: UserId,
        business_id: BusinessId,
        input: InviteInput,
    ) -> AccountResult<Invitation> {
        input.validate()?;
        let business = self
            .store
            .find_member_business(initiator, business_id)
            .await?
            .ok_or(AccountError::BusinessNotFound)?;

        let now = self.clock.now();
        let invitation = Invitation {
            id: InvitationId::new(),
            business_id: business.id,
            name: input.name.trim().to_string(),
            email: validation::normalize_email(&input.email),
            phone: validation::full_phone(&input.country_code, &input.phone),
            hash: generate_invitation_hash(),
            expires_at: now + self.policy.invitation_ttl,
            created_at: now,
            created_by: initiator,
        };
        self.store.insert_invitation(invitation.clone()).await?;

        let url = format!("{}/invites/{}", input.origin.trim_end_matches('/'), invitation.hash);
        let request = NotificationRequest::p2p(NotificationEvent::UserInvited)
            .email(invitation.email.clone())
            .sms(invitation.phone.clone())
            .token("InvitationURL", url)
            .token("Email", invitation.email.clone())
            .token("Name", invitation.name.clone())
            .token("Phone", invitation.phone.clone())
            .token("BusinessID", business.id.to_string())
            .token("BusinessName", business.name.clone())
            .token("ExpiresAt", format_expiry(invitation.expires_at));

        let publisher = self.publisher.clone();
        self.side_tasks.spawn("invitation-notification", async move {
            publisher
                .publish(&EventEnvelope::new(action::SEND, request))
                .await?;
            Ok(())
        });

        info!(invitation_id = %invitation.id, "invitation recorded");
        Ok(invitation)
    }
}
