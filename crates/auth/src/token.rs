//! Signed access tokens (HS256 JWT).

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use thiserror::Error;

use khata_core::{BusinessId, UserId};

use crate::claims::{AccessClaims, TokenValidationError, validate_claims};

pub const DEFAULT_ISSUER: &str = "khata";

/// Who a token is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
    pub business_id: Option<BusinessId>,
}

/// A signed token and the absolute instant it stops being valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Sign(String),

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error(transparent)]
    Window(#[from] TokenValidationError),
}

/// Issues and verifies access tokens with a shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], issuer: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Sign a token for `subject`, valid from `now` for the configured lifetime.
    ///
    /// `expires_at` is derived from the `exp` claim, so both always agree.
    pub fn issue(&self, subject: &TokenSubject, now: DateTime<Utc>) -> Result<AccessToken, TokenError> {
        let iat = now.timestamp();
        let exp = (now + self.lifetime).timestamp();
        let claims = AccessClaims {
            sub: subject.user_id,
            email: subject.email.clone(),
            name: subject.name.clone(),
            avatar: subject.avatar.clone(),
            business_id: subject.business_id,
            iss: self.issuer.clone(),
            iat,
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Sign(e.to_string()))?;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| TokenError::Sign(format!("unrepresentable expiry {exp}")))?;

        Ok(AccessToken { token, expires_at })
    }

    /// Check signature, issuer and time window; return the claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Time is checked against the injected clock below.
        validation.validate_exp = false;
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<AccessClaims>(token, &self.decoding, &validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

impl core::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: UserId::new(),
            email: "ann@x.io".into(),
            name: "Ann".into(),
            avatar: None,
            business_id: Some(BusinessId::new()),
        }
    }

    #[test]
    fn issued_token_verifies_and_keeps_scope() {
        let issuer = TokenIssuer::new(b"secret", DEFAULT_ISSUER, Duration::hours(1));
        let now = Utc::now();
        let subject = subject();

        let token = issuer.issue(&subject, now).unwrap();
        assert_eq!(token.expires_at.timestamp(), (now + Duration::hours(1)).timestamp());

        let claims = issuer.verify(&token.token, now).unwrap();
        assert_eq!(claims.sub, subject.user_id);
        assert_eq!(claims.business_id, subject.business_id);
        assert_eq!(claims.exp, token.expires_at.timestamp());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issuer = TokenIssuer::new(b"secret", DEFAULT_ISSUER, Duration::minutes(5));
        let now = Utc::now();
        let token = issuer.issue(&subject(), now).unwrap();

        let err = issuer.verify(&token.token, now + Duration::minutes(6)).unwrap_err();
        assert!(matches!(err, TokenError::Window(TokenValidationError::Expired)));
    }

    #[test]
    fn wrong_secret_or_issuer_is_rejected() {
        let now = Utc::now();
        let token = TokenIssuer::new(b"secret", DEFAULT_ISSUER, Duration::hours(1))
            .issue(&subject(), now)
            .unwrap();

        let other_secret = TokenIssuer::new(b"other", DEFAULT_ISSUER, Duration::hours(1));
        assert!(matches!(other_secret.verify(&token.token, now), Err(TokenError::Invalid(_))));

        let other_issuer = TokenIssuer::new(b"secret", "someone-else", Duration::hours(1));
        assert!(matches!(other_issuer.verify(&token.token, now), Err(TokenError::Invalid(_))));

        assert!(matches!(other_issuer.verify("not-a-jwt", now), Err(TokenError::Invalid(_))));
    }
}
