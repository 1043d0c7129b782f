//! Random credential material: one-time codes, opaque tokens, human ids.
//!
//! Everything here draws from the operating system CSPRNG.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// Number of digits in a one-time code.
pub const OTP_DIGITS: usize = 6;

/// Bytes of entropy behind refresh tokens and invitation hashes.
pub const SECRET_BYTES: usize = 64;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Six decimal digits, uniform over `000000..=999999`.
pub fn generate_otp() -> String {
    let n: u32 = OsRng.gen_range(0..1_000_000);
    format!("{n:0width$}", width = OTP_DIGITS)
}

/// Opaque refresh token: 64 random bytes, lowercase hex.
pub fn generate_refresh_token() -> String {
    random_hex(SECRET_BYTES)
}

/// Opaque invitation hash: 64 random bytes, lowercase hex.
pub fn generate_invitation_hash() -> String {
    random_hex(SECRET_BYTES)
}

/// Short human-facing identifier, e.g. `user-MFRGGZA`.
pub fn human_id(prefix: &str) -> String {
    let mut bytes = [0u8; 4];
    OsRng.fill_bytes(&mut bytes);
    format!("{prefix}-{}", base32_nopad(&bytes))
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// RFC 4648 base32, no padding.
pub fn base32_nopad(input: &[u8]) -> String {
    let mut out = String::with_capacity((input.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in input {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = (buffer >> bits) & 0x1f;
            out.push(BASE32_ALPHABET[idx as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        let idx = (buffer << (5 - bits)) & 0x1f;
        out.push(BASE32_ALPHABET[idx as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn base32_matches_rfc4648_vectors() {
        assert_eq!(base32_nopad(b""), "");
        assert_eq!(base32_nopad(b"f"), "MY");
        assert_eq!(base32_nopad(b"fo"), "MZXQ");
        assert_eq!(base32_nopad(b"foo"), "MZXW6");
        assert_eq!(base32_nopad(b"foob"), "MZXW6YQ");
        assert_eq!(base32_nopad(b"fooba"), "MZXW6YTB");
        assert_eq!(base32_nopad(b"foobar"), "MZXW6YTBOI");
    }

    #[test]
    fn secrets_are_128_hex_chars() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 128);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(token, generate_refresh_token());
        assert_eq!(generate_invitation_hash().len(), 128);
    }

    #[test]
    fn otp_is_six_digits() {
        for _ in 0..200 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    proptest! {
        #[test]
        fn human_id_has_prefix_and_seven_base32_chars(prefix in "[a-z]{1,10}") {
            let id = human_id(&prefix);
            let (p, rest) = id.split_once('-').unwrap();
            prop_assert_eq!(p, prefix.as_str());
            prop_assert_eq!(rest.len(), 7);
            prop_assert!(rest.bytes().all(|b| BASE32_ALPHABET.contains(&b)));
        }

        #[test]
        fn base32_length_is_ceil_of_bits_over_five(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
            let encoded = base32_nopad(&bytes);
            prop_assert_eq!(encoded.len(), (bytes.len() * 8).div_ceil(5));
        }
    }
}
