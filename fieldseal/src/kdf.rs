//! Key derivation.
//!
//! Password-like secrets from configuration are stretched with PBKDF2-HMAC-SHA256.
//! High-entropy material (for example secrets unwrapped by a KMS) only needs
//! HKDF-SHA256 expansion. Envelope data keys come straight from the OS CSPRNG.

use crate::error::KeyProviderError;
use crate::key::KeyTag;
use aes_gcm::aead::{rand_core::RngCore, OsRng};
use hkdf::Hkdf;
use secrecy::SecretVec;
use sha2::{Digest, Sha256};

/// Key size in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Default PBKDF2 iteration count (2^16).
pub const DEFAULT_ITERATIONS: u32 = 1 << 16;

/// Number of digest bytes used for a key tag.
const TAG_BYTES: usize = 4;

/// Derives a 256-bit key from a password-like secret using PBKDF2-HMAC-SHA256.
///
/// # Example
///
/// ```
/// use fieldseal::kdf::derive_key;
/// use secrecy::ExposeSecret;
///
/// let key = derive_key("correct horse battery staple", "salt", 1_000);
/// assert_eq!(key.expose_secret().len(), 32);
/// ```
#[must_use]
pub fn derive_key(password: &str, salt: &str, iterations: u32) -> SecretVec<u8> {
    let mut key = vec![0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);
    SecretVec::new(key)
}

/// Expands high-entropy key material into a 256-bit key with HKDF-SHA256.
///
/// `info` provides domain separation between different uses of the same material.
///
/// # Errors
///
/// Returns `KeyProviderError::InvalidKey` if the material is empty.
pub fn expand_key(material: &[u8], info: &[u8]) -> Result<SecretVec<u8>, KeyProviderError> {
    if material.is_empty() {
        return Err(KeyProviderError::InvalidKey("empty key material".to_string()));
    }

    let hkdf = Hkdf::<Sha256>::new(None, material);
    let mut key = vec![0u8; KEY_SIZE];
    hkdf.expand(info, &mut key)
        .map_err(|e| KeyProviderError::InvalidKey(format!("HKDF expansion failed: {e}")))?;

    Ok(SecretVec::new(key))
}

/// Generates a random 256-bit key, used as a per-message envelope data key.
#[must_use]
pub fn generate_key() -> SecretVec<u8> {
    let mut key = vec![0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    SecretVec::new(key)
}

/// Computes the public tag of a key: hex of the first 4 bytes of `SHA-256(secret)`.
///
/// The tag identifies a key without revealing it.
#[must_use]
pub fn key_tag(secret: &[u8]) -> KeyTag {
    let digest = Sha256::digest(secret);
    KeyTag::new(hex::encode(&digest[..TAG_BYTES]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_derive_key_deterministic() {
        let key1 = derive_key("secret", "salt", 100);
        let key2 = derive_key("secret", "salt", 100);

        assert_eq!(key1.expose_secret(), key2.expose_secret());
        assert_eq!(key1.expose_secret().len(), KEY_SIZE);
    }

    #[test]
    fn test_derive_key_depends_on_inputs() {
        let base = derive_key("secret", "salt", 100);

        assert_ne!(base.expose_secret(), derive_key("other", "salt", 100).expose_secret());
        assert_ne!(base.expose_secret(), derive_key("secret", "pepper", 100).expose_secret());
        assert_ne!(base.expose_secret(), derive_key("secret", "salt", 101).expose_secret());
    }

    // RFC 7914 section 11, PBKDF2-HMAC-SHA256 with c = 1
    #[test]
    fn test_pbkdf2_rfc7914_vector() {
        const EXPECTED_HEX: &str = "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc";

        let key = derive_key("passwd", "salt", 1);

        assert_eq!(hex::encode(key.expose_secret()), EXPECTED_HEX);
    }

    #[test]
    fn test_expand_key_domain_separation() {
        let material = [7u8; 32];
        let key1 = expand_key(&material, b"one").expect("HKDF expand failed");
        let key2 = expand_key(&material, b"two").expect("HKDF expand failed");

        assert_eq!(key1.expose_secret().len(), KEY_SIZE);
        assert_ne!(key1.expose_secret(), key2.expose_secret());
    }

    #[test]
    fn test_expand_key_rejects_empty_material() {
        assert!(expand_key(&[], b"info").is_err());
    }

    #[test]
    fn test_generate_key() {
        let key1 = generate_key();
        let key2 = generate_key();

        assert_ne!(key1.expose_secret(), key2.expose_secret());
        assert_eq!(key1.expose_secret().len(), KEY_SIZE);
    }

    #[test]
    fn test_key_tag_is_short_hex() {
        let tag = key_tag(&[1u8; 32]);

        assert_eq!(tag.as_str().len(), TAG_BYTES * 2);
        assert_eq!(tag, key_tag(&[1u8; 32]));
        assert_ne!(tag, key_tag(&[2u8; 32]));
    }
}
