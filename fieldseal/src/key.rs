//! Encryption keys.

use crate::error::KeyProviderError;
use crate::kdf::{self, KEY_SIZE};
use crate::message::EncryptedMessage;
use secrecy::{ExposeSecret, SecretVec};
use std::fmt;

/// Opaque identifier of a key, safe to store next to ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyTag(String);

impl KeyTag {
    /// Creates a tag from an arbitrary identifier.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 256-bit secret plus the tag used to refer to it.
///
/// Keys are produced by a [`KeyProvider`](crate::key_provider::KeyProvider) per call
/// and never persisted. Only the tag may end up in a message header.
///
/// Envelope keys additionally carry the wrapped form of themselves, which the
/// engine copies into the `k` header of every message sealed with the key.
pub struct EncryptionKey {
    secret: SecretVec<u8>,
    tag: KeyTag,
    wrapped_data_key: Option<Box<EncryptedMessage>>,
}

impl EncryptionKey {
    /// Creates a key from 32 bytes of secret material, tagged by its digest.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::InvalidKey` if the secret is not 32 bytes long.
    pub fn new(secret: SecretVec<u8>) -> Result<Self, KeyProviderError> {
        let len = secret.expose_secret().len();
        if len != KEY_SIZE {
            return Err(KeyProviderError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes of key material, got {len}"
            )));
        }

        let tag = kdf::key_tag(secret.expose_secret());
        Ok(Self { secret, tag, wrapped_data_key: None })
    }

    /// Replaces the digest-derived tag with an explicit one.
    #[must_use]
    pub fn with_tag(mut self, tag: KeyTag) -> Self {
        self.tag = tag;
        self
    }

    /// Attaches the wrapped (encrypted) form of this key for envelope encryption.
    #[must_use]
    pub fn with_wrapped_data_key(mut self, wrapped: EncryptedMessage) -> Self {
        self.wrapped_data_key = Some(Box::new(wrapped));
        self
    }

    /// Returns the secret key bytes.
    #[must_use]
    pub fn secret(&self) -> &[u8] {
        self.secret.expose_secret()
    }

    /// Returns the key tag.
    #[must_use]
    pub const fn tag(&self) -> &KeyTag {
        &self.tag
    }

    /// Returns the wrapped data key, for envelope keys.
    #[must_use]
    pub fn wrapped_data_key(&self) -> Option<&EncryptedMessage> {
        self.wrapped_data_key.as_deref()
    }
}

impl Clone for EncryptionKey {
    fn clone(&self) -> Self {
        Self {
            secret: SecretVec::new(self.secret.expose_secret().clone()),
            tag: self.tag.clone(),
            wrapped_data_key: self.wrapped_data_key.clone(),
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("tag", &self.tag)
            .field("envelope", &self.wrapped_data_key.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_requires_32_bytes() {
        let result = EncryptionKey::new(SecretVec::new(vec![1u8; 16]));
        assert!(matches!(result, Err(KeyProviderError::InvalidKey(_))));

        let key = EncryptionKey::new(SecretVec::new(vec![1u8; 32])).expect("valid key");
        assert_eq!(key.secret().len(), 32);
    }

    #[test]
    fn test_tag_derived_from_secret() {
        let key1 = EncryptionKey::new(SecretVec::new(vec![1u8; 32])).unwrap();
        let key2 = EncryptionKey::new(SecretVec::new(vec![1u8; 32])).unwrap();
        let key3 = EncryptionKey::new(SecretVec::new(vec![2u8; 32])).unwrap();

        assert_eq!(key1.tag(), key2.tag());
        assert_ne!(key1.tag(), key3.tag());
    }

    #[test]
    fn test_explicit_tag() {
        let key = EncryptionKey::new(SecretVec::new(vec![1u8; 32]))
            .unwrap()
            .with_tag(KeyTag::new("kms-0"));

        assert_eq!(key.tag().as_str(), "kms-0");
    }

    #[test]
    fn test_debug_hides_secret() {
        let key = EncryptionKey::new(SecretVec::new(vec![0xAB; 32])).unwrap();
        let debug = format!("{key:?}");

        assert!(debug.contains("tag"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_clone_keeps_material() {
        let key = EncryptionKey::new(SecretVec::new(vec![9u8; 32])).unwrap();
        let cloned = key.clone();

        assert_eq!(key.secret(), cloned.secret());
        assert_eq!(key.tag(), cloned.tag());
    }
}
