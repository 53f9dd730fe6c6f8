//! Encryption engine.
//!
//! The engine turns a plaintext into a stored string and back according to an
//! [`EncryptionScheme`]. Decryption walks the scheme and its previous schemes,
//! so an attribute can change keys, determinism or compression without
//! migrating existing rows first.

use crate::cipher;
use crate::codec::MessageCodec;
use crate::compressor::{Compressor, ZlibCompressor};
use crate::error::{Error, KeyProviderError};
use crate::key::EncryptionKey;
use crate::message::EncryptedMessage;
use crate::scheme::EncryptionScheme;
use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

/// Encrypts and decrypts attribute values.
///
/// The engine holds no keys; everything comes from the scheme passed to each
/// call, so one engine serves every attribute and every thread.
///
/// # Example
///
/// ```
/// use fieldseal::config::EncryptionConfig;
/// use fieldseal::engine::EncryptionEngine;
/// use fieldseal::scheme::EncryptionScheme;
///
/// let config = EncryptionConfig::new("primary", "salt").with_iterations(1_000);
/// let scheme = EncryptionScheme::builder("name").build(&config).unwrap();
/// let engine = EncryptionEngine::new();
///
/// let stored = engine.encrypt("Alice", &scheme).unwrap();
/// assert_eq!(engine.decrypt(&stored, &scheme).unwrap(), "Alice");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptionEngine {
    codec: MessageCodec,
}

impl EncryptionEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new() -> Self {
        Self { codec: MessageCodec::new() }
    }

    /// Returns the message codec.
    #[must_use]
    pub const fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    /// Encrypts `plaintext` with the scheme's current key.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` if the provider has no key
    /// - `Error::KeyProviderUnavailable` if key material cannot be fetched
    /// - `Error::Encryption` if sealing or compression fails
    pub fn encrypt(&self, plaintext: &str, scheme: &EncryptionScheme) -> Result<String, Error> {
        let key = scheme.key_provider().encryption_key()?;
        self.encrypt_with_key(plaintext, scheme, &key)
    }

    pub(crate) fn encrypt_with_key(
        &self,
        plaintext: &str,
        scheme: &EncryptionScheme,
        key: &EncryptionKey,
    ) -> Result<String, Error> {
        let normalized = scheme.normalize(plaintext);
        let bytes = normalized.as_bytes();

        let (payload, compressed) = match scheme.compressor() {
            Some(compressor) if bytes.len() > scheme.compression_threshold() => {
                (Zeroizing::new(compressor.deflate(bytes)?), true)
            }
            _ => (Zeroizing::new(bytes.to_vec()), false),
        };

        let iv = if scheme.is_deterministic() {
            cipher::deterministic_iv(key, &payload)?
        } else {
            cipher::random_iv()
        };
        let sealed = cipher::seal(key, &iv, &payload)?;

        let mut message =
            EncryptedMessage::new(sealed.ciphertext, iv, sealed.auth_tag).with_compressed(compressed);
        if scheme.key_provider().stores_key_references() {
            message = message.with_key_tag(key.tag().clone());
        }
        if let Some(wrapped) = key.wrapped_data_key() {
            message = message.with_wrapped_data_key(wrapped.clone());
        }

        trace!(
            attribute = scheme.attribute_name(),
            key_tag = %key.tag(),
            compressed,
            "encrypted value"
        );
        self.codec.encode(&message)
    }

    /// Decrypts a stored value, falling back to previous schemes.
    ///
    /// Schemes are tried in [`EncryptionScheme::all_schemes`] order and keys
    /// in the order their provider returns them. The first key that
    /// authenticates the message wins.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidMessage` if `stored` is not a message (and unencrypted
    ///   data is not supported), or the payload fails to inflate or is not UTF-8
    /// - `Error::Decryption` if no candidate key authenticates the message
    /// - `Error::KeyProviderUnavailable` if no key worked and at least one
    ///   provider could not be reached
    pub fn decrypt(&self, stored: &str, scheme: &EncryptionScheme) -> Result<String, Error> {
        let message = match self.codec.decode(stored) {
            Ok(message) => message,
            Err(_) if scheme.support_unencrypted_data() => {
                trace!(attribute = scheme.attribute_name(), "passing through unencrypted value");
                return Ok(stored.to_string());
            }
            Err(err) => return Err(err),
        };

        let mut unavailable = None;
        for (depth, candidate) in scheme.all_schemes().into_iter().enumerate() {
            let keys = match candidate.key_provider().decryption_keys(&message) {
                Ok(keys) => keys,
                Err(err @ (KeyProviderError::Unavailable(_) | KeyProviderError::Timeout(_))) => {
                    warn!(
                        attribute = scheme.attribute_name(),
                        depth,
                        error = %err,
                        "key provider unavailable during decryption"
                    );
                    unavailable = Some(err);
                    continue;
                }
                Err(err) => {
                    trace!(attribute = scheme.attribute_name(), depth, error = %err, "no candidate keys");
                    continue;
                }
            };

            for key in &keys {
                trace!(attribute = scheme.attribute_name(), depth, key_tag = %key.tag(), "trying key");
                let Ok(payload) =
                    cipher::open(key, message.iv(), message.ciphertext(), message.auth_tag())
                else {
                    continue;
                };

                if depth > 0 {
                    debug!(attribute = scheme.attribute_name(), depth, "decrypted with previous scheme");
                }
                return Self::finish(candidate, &message, &Zeroizing::new(payload));
            }
        }

        match unavailable {
            Some(err) => Err(err.into()),
            None => Err(Error::Decryption(format!(
                "no key could decrypt {}",
                scheme.attribute_name()
            ))),
        }
    }

    fn finish(
        scheme: &EncryptionScheme,
        message: &EncryptedMessage,
        payload: &Zeroizing<Vec<u8>>,
    ) -> Result<String, Error> {
        let inflated;
        let bytes: &[u8] = if message.is_compressed() {
            inflated = Zeroizing::new(match scheme.compressor() {
                Some(compressor) => compressor.inflate(payload)?,
                // Compressed before the scheme turned compression off.
                None => ZlibCompressor::default().inflate(payload)?,
            });
            &inflated
        } else {
            payload
        };

        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| Error::InvalidMessage(format!("payload is not valid UTF-8: {e}")))
    }

    /// Decrypts with fallback, then encrypts with the live scheme.
    ///
    /// Use this to migrate rows written under previous schemes or keys.
    ///
    /// # Errors
    ///
    /// Any error of [`decrypt`](Self::decrypt) or [`encrypt`](Self::encrypt).
    pub fn reencrypt(&self, stored: &str, scheme: &EncryptionScheme) -> Result<String, Error> {
        let plaintext = Zeroizing::new(self.decrypt(stored, scheme)?);
        self.encrypt(&plaintext, scheme)
    }

    /// Returns `true` if `stored` is a message this scheme can decrypt.
    #[must_use]
    pub fn is_encrypted(&self, stored: &str, scheme: &EncryptionScheme) -> bool {
        self.codec.looks_encrypted(stored) && self.decrypt(stored, scheme).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncryptionConfig;
    use crate::envelope::EnvelopeEncryptionKeyProvider;
    use crate::key_provider::{DerivedSecretKeyProvider, KeyProvider};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> EncryptionConfig {
        EncryptionConfig::new("primary", "salt").with_deterministic_key("det").with_iterations(10)
    }

    fn random_scheme() -> Arc<EncryptionScheme> {
        EncryptionScheme::builder("name").build(&config()).unwrap()
    }

    fn deterministic_scheme() -> Arc<EncryptionScheme> {
        EncryptionScheme::builder("email").deterministic(true).build(&config()).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let engine = EncryptionEngine::new();
        let scheme = random_scheme();

        let stored = engine.encrypt("Alice Liddell", &scheme).expect("Encryption failed");
        assert_ne!(stored, "Alice Liddell");
        assert_eq!(engine.decrypt(&stored, &scheme).expect("Decryption failed"), "Alice Liddell");
    }

    #[test]
    fn test_empty_string() {
        let engine = EncryptionEngine::new();
        let scheme = deterministic_scheme();

        let stored = engine.encrypt("", &scheme).unwrap();
        assert_eq!(engine.decrypt(&stored, &scheme).unwrap(), "");
    }

    #[test]
    fn test_deterministic_is_stable() {
        let engine = EncryptionEngine::new();
        let scheme = deterministic_scheme();

        let first = engine.encrypt("alice@example.com", &scheme).unwrap();
        let second = engine.encrypt("alice@example.com", &scheme).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_random_differs() {
        let engine = EncryptionEngine::new();
        let scheme = random_scheme();

        let stored: HashSet<String> =
            (0..300).map(|_| engine.encrypt("alice@example.com", &scheme).unwrap()).collect();

        assert_eq!(stored.len(), 300);
    }

    #[test]
    fn test_short_values_not_compressed() {
        let engine = EncryptionEngine::new();
        let stored = engine.encrypt("short", &random_scheme()).unwrap();

        assert!(!engine.codec().decode(&stored).unwrap().is_compressed());
    }

    #[test]
    fn test_long_values_compressed() {
        let engine = EncryptionEngine::new();
        let scheme = random_scheme();
        let long = "lorem ipsum ".repeat(40);

        let stored = engine.encrypt(&long, &scheme).unwrap();
        let message = engine.codec().decode(&stored).unwrap();

        assert!(message.is_compressed());
        assert!(message.ciphertext().len() < long.len());
        assert_eq!(engine.decrypt(&stored, &scheme).unwrap(), long);
    }

    #[test]
    fn test_compressed_message_readable_after_compression_disabled() {
        let engine = EncryptionEngine::new();
        let long = "x".repeat(500);
        let stored = engine.encrypt(&long, &random_scheme()).unwrap();

        let uncompressed = EncryptionScheme::builder("name").without_compression().build(&config()).unwrap();
        assert_eq!(engine.decrypt(&stored, &uncompressed).unwrap(), long);
    }

    #[test]
    fn test_downcase() {
        let engine = EncryptionEngine::new();
        let scheme =
            EncryptionScheme::builder("email").deterministic(true).downcase(true).build(&config()).unwrap();

        let upper = engine.encrypt("Alice@Example.COM", &scheme).unwrap();
        let lower = engine.encrypt("alice@example.com", &scheme).unwrap();

        assert_eq!(upper, lower);
        assert_eq!(engine.decrypt(&upper, &scheme).unwrap(), "alice@example.com");
    }

    #[test]
    fn test_key_reference_written_when_enabled() {
        let engine = EncryptionEngine::new();
        let with_refs = EncryptionScheme::builder("name")
            .build(&config().with_store_key_references(true))
            .unwrap();

        let plain = engine.codec().decode(&engine.encrypt("v", &random_scheme()).unwrap()).unwrap();
        let tagged = engine.codec().decode(&engine.encrypt("v", &with_refs).unwrap()).unwrap();

        assert!(plain.key_tag().is_none());
        assert!(tagged.key_tag().is_some());
    }

    #[test]
    fn test_invalid_message() {
        let engine = EncryptionEngine::new();
        let result = engine.decrypt("not encrypted", &random_scheme());
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_unencrypted_pass_through() {
        let engine = EncryptionEngine::new();
        let scheme = EncryptionScheme::builder("name")
            .support_unencrypted_data(true)
            .build(&config())
            .unwrap();

        assert_eq!(engine.decrypt("legacy value", &scheme).unwrap(), "legacy value");
        assert!(!engine.is_encrypted("legacy value", &scheme));
    }

    #[test]
    fn test_wrong_key_is_decryption_error() {
        let engine = EncryptionEngine::new();
        let stored = engine.encrypt("secret", &random_scheme()).unwrap();

        let other = EncryptionScheme::builder("name")
            .build(&EncryptionConfig::new("other", "salt").with_iterations(10))
            .unwrap();
        assert!(matches!(engine.decrypt(&stored, &other), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_decryption_error_not_passed_through() {
        let engine = EncryptionEngine::new();
        let stored = engine.encrypt("secret", &random_scheme()).unwrap();

        let other = EncryptionScheme::builder("name")
            .support_unencrypted_data(true)
            .build(&EncryptionConfig::new("other", "salt").with_iterations(10))
            .unwrap();
        assert!(matches!(engine.decrypt(&stored, &other), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_previous_scheme_fallback() {
        let engine = EncryptionEngine::new();
        let stored = engine.encrypt("Alice", &random_scheme()).unwrap();

        let migrated = EncryptionScheme::builder("name")
            .deterministic(true)
            .previous(EncryptionScheme::builder("name"))
            .build(&config())
            .unwrap();

        assert_eq!(engine.decrypt(&stored, &migrated).unwrap(), "Alice");
    }

    #[test]
    fn test_reencrypt_moves_to_live_scheme() {
        let engine = EncryptionEngine::new();
        let old = engine.encrypt("Alice", &random_scheme()).unwrap();

        let migrated = EncryptionScheme::builder("name")
            .deterministic(true)
            .previous(EncryptionScheme::builder("name"))
            .build(&config())
            .unwrap();

        let fresh = engine.reencrypt(&old, &migrated).unwrap();
        assert_eq!(fresh, engine.encrypt("Alice", &migrated).unwrap());
        assert!(engine.is_encrypted(&fresh, &migrated));
    }

    #[test]
    fn test_envelope_round_trip() {
        let engine = EncryptionEngine::new();
        let primary = DerivedSecretKeyProvider::new(&["primary"], "salt", 10).unwrap();
        let scheme = EncryptionScheme::builder("ssn")
            .key_provider(Arc::new(EnvelopeEncryptionKeyProvider::new(primary)))
            .build(&config())
            .unwrap();

        let stored = engine.encrypt("123-45-6789", &scheme).unwrap();
        let message = engine.codec().decode(&stored).unwrap();

        assert!(message.wrapped_data_key().is_some());
        assert_eq!(engine.decrypt(&stored, &scheme).unwrap(), "123-45-6789");
    }

    #[derive(Debug, Default)]
    struct FlakyProvider {
        down: AtomicBool,
        inner: Option<DerivedSecretKeyProvider>,
    }

    impl KeyProvider for FlakyProvider {
        fn encryption_key(&self) -> Result<EncryptionKey, KeyProviderError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(KeyProviderError::Timeout(Duration::from_secs(1)));
            }
            self.inner.as_ref().ok_or(KeyProviderError::NoKeys)?.encryption_key()
        }

        fn decryption_keys(
            &self,
            message: &EncryptedMessage,
        ) -> Result<Vec<EncryptionKey>, KeyProviderError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(KeyProviderError::Timeout(Duration::from_secs(1)));
            }
            self.inner.as_ref().ok_or(KeyProviderError::NoKeys)?.decryption_keys(message)
        }
    }

    #[test]
    fn test_unavailable_provider_is_retryable() {
        let engine = EncryptionEngine::new();
        let provider = Arc::new(FlakyProvider {
            down: AtomicBool::new(false),
            inner: Some(DerivedSecretKeyProvider::new(&["remote"], "salt", 10).unwrap()),
        });
        let scheme = EncryptionScheme::builder("name")
            .key_provider(Arc::clone(&provider) as Arc<dyn KeyProvider>)
            .build(&config())
            .unwrap();

        let stored = engine.encrypt("Alice", &scheme).unwrap();
        provider.down.store(true, Ordering::SeqCst);

        let err = engine.decrypt(&stored, &scheme).unwrap_err();
        assert!(matches!(err, Error::KeyProviderUnavailable(_)));
        assert!(err.is_retryable());
        assert!(engine.encrypt("Bob", &scheme).unwrap_err().is_retryable());
    }
}
