use khata_auth::AccessClaims;
use khata_core::{BusinessId, UserId};

/// Authenticated caller of a request, derived from the bearer token.
///
/// Present on every route behind the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: UserId,
    email: String,
    business_id: Option<BusinessId>,
}

impl AuthContext {
    pub fn from_claims(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            business_id: claims.business_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Business the token was scoped to at login or selection.
    pub fn business_id(&self) -> Option<BusinessId> {
        self.business_id
    }
}
