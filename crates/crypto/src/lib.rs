//! Key hashing and HMAC signing primitives shared by the authenticator (C2)
//! and the webhook engine (C7).
//!
//! Plaintext API keys are never stored; [`hash_key`] produces the only form
//! that's persisted, and [`verify_key`] checks a candidate against it with a
//! constant-time comparison internal to `argon2`. [`sign_hmac_sha256`]/
//! [`verify_hmac_signature`] implement the webhook delivery signature
//! contract.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to hash key: {0}")]
    Hash(String),

    #[error("invalid HMAC key length")]
    InvalidHmacKey,
}

/// Hash a plaintext API key with argon2 for storage in [`apigate_core::Key::hash`].
///
/// # Errors
/// Returns [`CryptoError::Hash`] if the underlying argon2 hasher fails
/// (salt generation failure; effectively infallible in practice).
pub fn hash_key(plaintext: &str) -> Result<String, CryptoError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::Hash(e.to_string()))
}

/// Verify a candidate plaintext key against a stored argon2 hash.
///
/// Returns `false` (never an error) for a malformed stored hash — that
/// candidate simply fails to authenticate.
#[must_use]
pub fn verify_key(stored_hash: &str, candidate: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

/// Extract the first `len` characters of `plaintext` as its prefix index.
#[must_use]
pub fn key_prefix(plaintext: &str, len: usize) -> String {
    plaintext.chars().take(len).collect()
}

/// Compute the lowercase-hex HMAC-SHA256 of `body` keyed by `secret`.
///
/// # Errors
/// Returns [`CryptoError::InvalidHmacKey`] if `secret` is rejected by the
/// HMAC key schedule (HMAC accepts any key length, so this is unreachable
/// in practice but kept explicit rather than panicking).
pub fn sign_hmac_sha256(body: &[u8], secret: &str) -> Result<String, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| CryptoError::InvalidHmacKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook signature in constant time. `signature` is the
/// lowercase-hex digest without the `sha256=` prefix.
#[must_use]
pub fn verify_hmac_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(expected) = sign_hmac_sha256(body, secret) else {
        return false;
    };
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_key("ak_test12345").unwrap();
        assert!(verify_key(&hash, "ak_test12345"));
        assert!(!verify_key(&hash, "ak_wrong"));
    }

    #[test]
    fn verify_key_rejects_malformed_hash() {
        assert!(!verify_key("not-a-hash", "anything"));
    }

    #[test]
    fn key_prefix_takes_leading_chars() {
        assert_eq!(key_prefix("ak_abcdefgh", 6), "ak_abc");
        assert_eq!(key_prefix("short", 20), "short");
    }

    #[test]
    fn hmac_signature_round_trip() {
        let body = b"{\"id\":\"evt_1\"}";
        let sig = sign_hmac_sha256(body, "whsec_1").unwrap();
        assert!(verify_hmac_signature(body, &sig, "whsec_1"));
    }

    #[test]
    fn hmac_signature_rejects_tampered_body() {
        let body = b"{\"id\":\"evt_1\"}";
        let other = b"{\"id\":\"evt_2\"}";
        let sig = sign_hmac_sha256(body, "whsec_1").unwrap();
        assert!(!verify_hmac_signature(other, &sig, "whsec_1"));
    }

    #[test]
    fn hmac_signature_rejects_wrong_secret() {
        let body = b"payload";
        let sig = sign_hmac_sha256(body, "correct").unwrap();
        assert!(!verify_hmac_signature(body, &sig, "incorrect"));
    }

    #[test]
    fn hmac_is_deterministic() {
        let sig1 = sign_hmac_sha256(b"data", "secret").unwrap();
        let sig2 = sign_hmac_sha256(b"data", "secret").unwrap();
        assert_eq!(sig1, sig2);
    }
}
