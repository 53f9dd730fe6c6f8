//! Envelope encryption key provider.
//!
//! Every encryption gets a fresh random data key:
//! 1. Generate a random 256-bit data key
//! 2. Encrypt the payload with the data key
//! 3. Wrap (encrypt) the data key with the primary key
//! 4. Store the wrapped data key in the message header (`k`)
//!
//! Decryption unwraps the data key with one of the primary keys first.

use crate::cipher;
use crate::error::KeyProviderError;
use crate::kdf::generate_key;
use crate::key::EncryptionKey;
use crate::key_provider::{DerivedSecretKeyProvider, KeyProvider};
use crate::message::EncryptedMessage;
use secrecy::SecretVec;
use tracing::debug;

/// Key provider that wraps a per-message data key with a primary key.
///
/// Envelope keys are random, so they cannot back deterministic schemes.
///
/// # Example
///
/// ```
/// use fieldseal::envelope::EnvelopeEncryptionKeyProvider;
/// use fieldseal::key_provider::{DerivedSecretKeyProvider, KeyProvider};
///
/// let primary = DerivedSecretKeyProvider::new(&["primary-secret"], "salt", 1_000).unwrap();
/// let provider = EnvelopeEncryptionKeyProvider::new(primary);
///
/// let key = provider.encryption_key().unwrap();
/// assert!(key.wrapped_data_key().is_some());
/// ```
#[derive(Debug)]
pub struct EnvelopeEncryptionKeyProvider<P: KeyProvider = DerivedSecretKeyProvider> {
    primary: P,
}

impl<P: KeyProvider> EnvelopeEncryptionKeyProvider<P> {
    /// Creates an envelope provider on top of a primary key provider.
    pub const fn new(primary: P) -> Self {
        Self { primary }
    }

    /// Returns the primary key provider.
    pub const fn primary(&self) -> &P {
        &self.primary
    }

    fn unwrap_with(
        primary_key: &EncryptionKey,
        wrapped: &EncryptedMessage,
    ) -> Option<Result<EncryptionKey, KeyProviderError>> {
        let secret =
            cipher::open(primary_key, wrapped.iv(), wrapped.ciphertext(), wrapped.auth_tag()).ok()?;

        Some(
            EncryptionKey::new(SecretVec::new(secret))
                .map(|key| key.with_tag(primary_key.tag().clone()))
                .map_err(|e| KeyProviderError::UnwrapFailed(e.to_string())),
        )
    }
}

impl<P: KeyProvider> KeyProvider for EnvelopeEncryptionKeyProvider<P> {
    fn encryption_key(&self) -> Result<EncryptionKey, KeyProviderError> {
        let primary_key = self.primary.encryption_key()?;
        let data_key = EncryptionKey::new(generate_key())?;

        let iv = cipher::random_iv();
        let sealed = cipher::seal(&primary_key, &iv, data_key.secret())
            .map_err(|e| KeyProviderError::WrapFailed(e.to_string()))?;

        let mut wrapped = EncryptedMessage::new(sealed.ciphertext, iv, sealed.auth_tag);
        if self.primary.stores_key_references() {
            wrapped = wrapped.with_key_tag(primary_key.tag().clone());
        }

        Ok(data_key.with_tag(primary_key.tag().clone()).with_wrapped_data_key(wrapped))
    }

    fn decryption_keys(
        &self,
        message: &EncryptedMessage,
    ) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        let Some(wrapped) = message.wrapped_data_key() else {
            return Ok(Vec::new());
        };

        for primary_key in self.primary.decryption_keys(wrapped)? {
            if let Some(data_key) = Self::unwrap_with(&primary_key, wrapped) {
                return data_key.map(|key| vec![key]);
            }
        }

        debug!("no primary key unwraps the data key");
        Ok(Vec::new())
    }

    // Envelope ciphertext is never searchable.
    fn query_keys(&self) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        Ok(Vec::new())
    }

    fn supports_deterministic(&self) -> bool {
        false
    }

    fn stores_key_references(&self) -> bool {
        self.primary.stores_key_references()
    }
}
