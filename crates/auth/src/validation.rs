//! Field-level input rules shared by the service operations.

use email_address::EmailAddress;

use khata_core::ValidationErrors;

pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 255;
pub const PHONE_MIN: usize = 10;
pub const PHONE_MAX: usize = 16;
pub const DESCRIPTION_MIN: usize = 50;
pub const DESCRIPTION_MAX: usize = 255;

/// Emails are compared and stored trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn required(field: &str, value: &str, errors: &mut ValidationErrors) -> bool {
    if value.trim().is_empty() {
        errors.add(field, "required");
        return false;
    }
    true
}

pub fn length(field: &str, value: &str, min: usize, max: usize, errors: &mut ValidationErrors) {
    let len = value.chars().count();
    if len < min {
        errors.add_with_param(field, "min", min);
    } else if len > max {
        errors.add_with_param(field, "max", max);
    }
}

/// Person name: letters and spaces, 3..=255 characters.
pub fn person_name(field: &str, value: &str, errors: &mut ValidationErrors) {
    if !required(field, value, errors) {
        return;
    }
    length(field, value, NAME_MIN, NAME_MAX, errors);
    if !value.chars().all(|c| c.is_alphabetic() || c == ' ') {
        errors.add(field, "alpha_space");
    }
}

pub fn email(field: &str, value: &str, errors: &mut ValidationErrors) {
    if !required(field, value, errors) {
        return;
    }
    if !EmailAddress::is_valid(value.trim()) {
        errors.add(field, "email");
    }
}

/// National number: digits only, 10..=16 long.
pub fn phone(field: &str, value: &str, errors: &mut ValidationErrors) {
    if !required(field, value, errors) {
        return;
    }
    if !value.chars().all(|c| c.is_ascii_digit()) {
        errors.add(field, "numeric");
        return;
    }
    length(field, value, PHONE_MIN, PHONE_MAX, errors);
}

/// Dialling prefix such as `+1` or `91`.
pub fn country_code(field: &str, value: &str, errors: &mut ValidationErrors) {
    if !required(field, value, errors) {
        return;
    }
    let digits = value.strip_prefix('+').unwrap_or(value);
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        errors.add(field, "country_code");
    }
}

/// Stored phone number: country code followed by the national number.
pub fn full_phone(country_code: &str, phone: &str) -> String {
    format!("{}{}", country_code.trim(), phone.trim())
}

pub fn otp(field: &str, value: &str, errors: &mut ValidationErrors) {
    if !required(field, value, errors) {
        return;
    }
    if value.len() != crate::crypto::OTP_DIGITS || !value.chars().all(|c| c.is_ascii_digit()) {
        errors.add_with_param(field, "len", crate::crypto::OTP_DIGITS);
    }
}

pub fn http_url(field: &str, value: &str, errors: &mut ValidationErrors) {
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.contains(char::is_whitespace) => {}
        _ => errors.add(field, "url"),
    }
}

/// ISO-4217 style code: three uppercase ASCII letters.
pub fn currency(field: &str, value: &str, errors: &mut ValidationErrors) {
    if value.len() != 3 || !value.chars().all(|c| c.is_ascii_uppercase()) {
        errors.add(field, "currency");
    }
}

pub fn equal(field: &str, value: &str, other: &str, errors: &mut ValidationErrors) {
    if value != other {
        errors.add(field, "eqfield");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(f: impl FnOnce(&mut ValidationErrors)) -> ValidationErrors {
        let mut errs = ValidationErrors::new();
        f(&mut errs);
        errs
    }

    #[test]
    fn names_allow_letters_and_spaces_only() {
        assert!(run(|e| person_name("name", "Ann Lee", e)).is_empty());
        assert!(run(|e| person_name("name", "Al", e)).has("name"));
        assert!(run(|e| person_name("name", "R2 D2", e)).has("name"));
        assert!(run(|e| person_name("name", "", e)).has("name"));
    }

    #[test]
    fn phone_rules() {
        assert!(run(|e| phone("phone", "5550100000", e)).is_empty());
        assert!(run(|e| phone("phone", "555-0100", e)).has("phone"));
        assert!(run(|e| phone("phone", "555010", e)).has("phone"));
        assert!(run(|e| phone("phone", "12345678901234567", e)).has("phone"));
    }

    #[test]
    fn country_codes() {
        assert!(run(|e| country_code("country_code", "+1", e)).is_empty());
        assert!(run(|e| country_code("country_code", "91", e)).is_empty());
        assert!(run(|e| country_code("country_code", "+", e)).has("country_code"));
        assert!(run(|e| country_code("country_code", "+12345", e)).has("country_code"));
    }

    #[test]
    fn emails_are_normalized_and_checked() {
        assert_eq!(normalize_email("  Ann@X.io "), "ann@x.io");
        assert!(run(|e| email("email", "ann@x.io", e)).is_empty());
        assert!(run(|e| email("email", "ann.x.io", e)).has("email"));
    }

    #[test]
    fn otp_must_be_six_digits() {
        assert!(run(|e| otp("code", "012345", e)).is_empty());
        assert!(run(|e| otp("code", "12345", e)).has("code"));
        assert!(run(|e| otp("code", "12a456", e)).has("code"));
    }

    #[test]
    fn urls_and_currencies() {
        assert!(run(|e| http_url("logo", "https://cdn.x.io/logo.png", e)).is_empty());
        assert!(run(|e| http_url("logo", "ftp://x", e)).has("logo"));
        assert!(run(|e| currency("primary_currency", "USD", e)).is_empty());
        assert!(run(|e| currency("primary_currency", "usd", e)).has("primary_currency"));
    }
}
