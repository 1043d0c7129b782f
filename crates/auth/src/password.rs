//! Password hashing port and strength policy.

use std::sync::Arc;

use thiserror::Error;

use khata_core::ValidationErrors;

pub const MIN_PASSWORD_LEN: usize = 8;
/// bcrypt only reads this many bytes of input.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("stored hash is malformed: {0}")]
    Malformed(String),

    #[error("password is {0} bytes, bcrypt reads at most {MAX_PASSWORD_BYTES}")]
    TooLong(usize),
}

/// One-way password hashing.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, HashError>;

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unusable.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError>;
}

impl<H> PasswordHasher for Arc<H>
where
    H: PasswordHasher + ?Sized,
{
    fn hash(&self, password: &str) -> Result<String, HashError> {
        (**self).hash(password)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError> {
        (**self).verify(password, hash)
    }
}

/// bcrypt with a configurable work factor.
#[derive(Debug, Clone, Copy)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub const DEFAULT_COST: u32 = 10;

    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COST)
    }
}

impl PasswordHasher for BcryptHasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(HashError::TooLong(password.len()));
        }
        bcrypt::hash(password, self.cost).map_err(|e| HashError::Hash(e.to_string()))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError> {
        // Anything past the limit would be silently cut, so it can never match.
        if password.len() > MAX_PASSWORD_BYTES {
            return Ok(false);
        }
        bcrypt::verify(password, hash).map_err(|e| HashError::Malformed(e.to_string()))
    }
}

/// Strength rules: length bounds plus upper, lower, digit and symbol.
///
/// The upper bound is in bytes, matching what bcrypt actually hashes.
///
/// Errors are recorded against `field` so callers can reuse this for both
/// `password` and `new_password` inputs.
pub fn check_password_strength(field: &str, password: &str, errors: &mut ValidationErrors) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add_with_param(field, "min", MIN_PASSWORD_LEN);
        return;
    }
    if password.len() > MAX_PASSWORD_BYTES {
        errors.add_with_param(field, "max", MAX_PASSWORD_BYTES);
        return;
    }

    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| c.is_ascii_punctuation());

    if !(has_upper && has_lower && has_digit && has_symbol) {
        errors.add(field, "password_strength");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strength(pw: &str) -> ValidationErrors {
        let mut errs = ValidationErrors::new();
        check_password_strength("password", pw, &mut errs);
        errs
    }

    #[test]
    fn strong_password_passes() {
        assert!(strength("Secr3t!pass").is_empty());
    }

    #[test]
    fn each_missing_class_fails() {
        for weak in ["secr3t!pass", "SECR3T!PASS", "Secret!pass", "Secr3tpass1"] {
            let errs = strength(weak);
            assert_eq!(errs.fields()[0].code, "password_strength", "{weak}");
        }
    }

    #[test]
    fn length_bounds() {
        assert_eq!(strength("S3c!").fields()[0].code, "min");
        let long = format!("Aa1!{}", "x".repeat(MAX_PASSWORD_BYTES));
        assert_eq!(strength(&long).fields()[0].code, "max");

        let exact = format!("Aa1!{}", "x".repeat(MAX_PASSWORD_BYTES - 4));
        assert!(strength(&exact).is_empty());
    }

    #[test]
    fn length_cap_counts_bytes() {
        // 28 chars but 76 bytes.
        let wide = format!("Aa1!{}", "€".repeat(24));
        assert!(wide.chars().count() < MAX_PASSWORD_BYTES);
        assert_eq!(strength(&wide).fields()[0].code, "max");
    }

    #[test]
    fn bcrypt_never_matches_past_its_input_limit() {
        let hasher = BcryptHasher::new(4);
        let stored = format!("Aa1!{}", "x".repeat(MAX_PASSWORD_BYTES - 4));
        let hash = hasher.hash(&stored).unwrap();

        assert!(hasher.verify(&stored, &hash).unwrap());
        assert!(!hasher.verify(&format!("{stored}WRONG"), &hash).unwrap());
        assert!(matches!(
            hasher.hash(&format!("{stored}ONE")),
            Err(HashError::TooLong(76))
        ));
    }

    #[test]
    fn bcrypt_round_trip() {
        let hasher = BcryptHasher::new(4);
        let hash = hasher.hash("Secr3t!pass").unwrap();

        assert!(hasher.verify("Secr3t!pass", &hash).unwrap());
        assert!(!hasher.verify("Wrong!pass1", &hash).unwrap());
        assert!(hasher.verify("Secr3t!pass", "not-a-hash").is_err());
    }
}
