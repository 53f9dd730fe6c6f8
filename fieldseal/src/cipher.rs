//! AES-256-GCM authenticated encryption.
//!
//! # IV derivation
//!
//! - **Random** (non-deterministic schemes): 12 fresh bytes from the OS CSPRNG per call.
//! - **Deterministic**: `HMAC-SHA256(key, plaintext)[..12]`. The same key and
//!   plaintext always give the same IV and therefore the same ciphertext, which
//!   is what makes equality queries possible.
//!
//! Deterministic schemes draw their keys from separate key material so an IV is
//! never reused across the two modes under one key.

use crate::error::Error;
use crate::key::EncryptionKey;
use aes_gcm::{
    aead::{rand_core::RngCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// IV size for AES-GCM (96 bits).
pub const IV_SIZE: usize = 12;

/// Authentication tag size for AES-GCM (128 bits).
pub const AUTH_TAG_SIZE: usize = 16;

/// Output of [`seal`]: ciphertext and detached authentication tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Encrypted bytes, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// GCM authentication tag
    pub auth_tag: [u8; AUTH_TAG_SIZE],
}

/// Encrypts `plaintext` under `key` with the given IV.
///
/// # Errors
///
/// Returns `Error::Encryption` if the key is rejected by the cipher.
pub fn seal(key: &EncryptionKey, iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Sealed, Error> {
    let cipher = Aes256Gcm::new_from_slice(key.secret())
        .map_err(|e| Error::Encryption(format!("Invalid key: {e}")))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(iv), b"", &mut buffer)
        .map_err(|e| Error::Encryption(format!("AES-256-GCM encryption failed: {e}")))?;

    let mut auth_tag = [0u8; AUTH_TAG_SIZE];
    auth_tag.copy_from_slice(&tag);

    Ok(Sealed { ciphertext: buffer, auth_tag })
}

/// Decrypts and authenticates `ciphertext`.
///
/// # Errors
///
/// Returns `Error::Decryption` if the tag does not verify, meaning a wrong key
/// or tampered data.
pub fn open(
    key: &EncryptionKey,
    iv: &[u8; IV_SIZE],
    ciphertext: &[u8],
    auth_tag: &[u8; AUTH_TAG_SIZE],
) -> Result<Vec<u8>, Error> {
    let cipher = Aes256Gcm::new_from_slice(key.secret())
        .map_err(|e| Error::Decryption(format!("Invalid key: {e}")))?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv),
            b"",
            &mut buffer,
            Tag::from_slice(auth_tag),
        )
        .map_err(|_| {
            Error::Decryption("authentication failed: wrong key or tampered data".to_string())
        })?;

    Ok(buffer)
}

/// Derives the IV for deterministic encryption from key and plaintext.
///
/// # Errors
///
/// Returns `Error::Encryption` if the HMAC cannot be keyed.
pub fn deterministic_iv(key: &EncryptionKey, plaintext: &[u8]) -> Result<[u8; IV_SIZE], Error> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.secret())
        .map_err(|e| Error::Encryption(format!("Invalid HMAC key: {e}")))?;
    mac.update(plaintext);
    let digest = mac.finalize().into_bytes();

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&digest[..IV_SIZE]);
    Ok(iv)
}

/// Draws a random IV.
#[must_use]
pub fn random_iv() -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretVec;

    fn key(byte: u8) -> EncryptionKey {
        EncryptionKey::new(SecretVec::new(vec![byte; 32])).unwrap()
    }

    #[test]
    fn test_seal_open_round_trip() {
        let key = key(42);
        let iv = random_iv();

        let sealed = seal(&key, &iv, b"alice@example.com").expect("Encryption failed");
        let opened = open(&key, &iv, &sealed.ciphertext, &sealed.auth_tag).expect("Decryption failed");

        assert_eq!(opened, b"alice@example.com");
        assert_eq!(sealed.ciphertext.len(), b"alice@example.com".len());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = key(1);
        let iv = random_iv();

        let sealed = seal(&key, &iv, b"").unwrap();
        let opened = open(&key, &iv, &sealed.ciphertext, &sealed.auth_tag).unwrap();

        assert!(opened.is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let iv = random_iv();
        let sealed = seal(&key(1), &iv, b"secret").unwrap();

        let result = open(&key(2), &iv, &sealed.ciphertext, &sealed.auth_tag);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = key(3);
        let iv = random_iv();
        let mut sealed = seal(&key, &iv, b"secret").unwrap();
        sealed.auth_tag[0] ^= 0x01;

        let result = open(&key, &iv, &sealed.ciphertext, &sealed.auth_tag);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_tampered_iv_fails() {
        let key = key(3);
        let mut iv = random_iv();
        let sealed = seal(&key, &iv, b"secret").unwrap();
        iv[IV_SIZE - 1] ^= 0x80;

        let result = open(&key, &iv, &sealed.ciphertext, &sealed.auth_tag);
        assert!(matches!(result, Err(Error::Decryption(_))));
    }

    #[test]
    fn test_deterministic_iv_stable() {
        let key = key(5);

        let iv1 = deterministic_iv(&key, b"alice@example.com").unwrap();
        let iv2 = deterministic_iv(&key, b"alice@example.com").unwrap();
        let iv3 = deterministic_iv(&key, b"bob@example.com").unwrap();

        assert_eq!(iv1, iv2);
        assert_ne!(iv1, iv3);
    }

    #[test]
    fn test_deterministic_iv_depends_on_key() {
        let iv1 = deterministic_iv(&key(5), b"value").unwrap();
        let iv2 = deterministic_iv(&key(6), b"value").unwrap();

        assert_ne!(iv1, iv2);
    }

    #[test]
    fn test_deterministic_iv_matches_hmac_prefix() {
        let key = key(7);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(key.secret()).unwrap();
        mac.update(b"value");
        let expected = mac.finalize().into_bytes();

        let iv = deterministic_iv(&key, b"value").unwrap();
        assert_eq!(&iv[..], &expected[..IV_SIZE]);
    }

    #[test]
    fn test_random_iv_differs() {
        assert_ne!(random_iv(), random_iv());
    }
}
