//! Key provider abstraction for key management.
//!
//! A provider hands out the key for new encryptions and the ordered list of
//! candidate keys for decrypting a given message. Rotation is expressed by
//! adding keys; existing keys are never mutated.

use crate::error::KeyProviderError;
use crate::kdf;
use crate::key::{EncryptionKey, KeyTag};
use crate::message::EncryptedMessage;

/// Provides keys for encryption and decryption.
///
/// Implementations must be thread-safe (`Send + Sync`) to support
/// concurrent encryption operations. They may block on I/O, for example when
/// key material lives in a remote KMS.
///
/// # Example
///
/// ```rust,ignore
/// use fieldseal::key_provider::KeyProvider;
///
/// struct MyProvider;
///
/// impl KeyProvider for MyProvider {
///     fn encryption_key(&self) -> Result<EncryptionKey, KeyProviderError> {
///         // Implementation
///     }
///     // ... other methods
/// }
/// ```
pub trait KeyProvider: Send + Sync {
    /// Returns the key to use for new encryptions.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NoKeys` if no key is configured, or
    /// `Unavailable`/`Timeout` if key material cannot be fetched.
    fn encryption_key(&self) -> Result<EncryptionKey, KeyProviderError>;

    /// Returns every key worth trying for `message`, most likely first.
    ///
    /// An empty list means this provider cannot decrypt the message; the
    /// engine then moves on to previous schemes.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`/`Timeout` if key material cannot be fetched.
    fn decryption_keys(
        &self,
        message: &EncryptedMessage,
    ) -> Result<Vec<EncryptionKey>, KeyProviderError>;

    /// Returns every key a deterministic ciphertext may have been written with.
    ///
    /// Used to build equality-query candidates across key rotations.
    ///
    /// # Errors
    ///
    /// Same as [`encryption_key`](Self::encryption_key).
    fn query_keys(&self) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        Ok(vec![self.encryption_key()?])
    }

    /// Returns `true` if the provider hands out stable keys usable for
    /// deterministic encryption.
    fn supports_deterministic(&self) -> bool {
        true
    }

    /// Returns `true` if messages should record the tag of their key.
    fn stores_key_references(&self) -> bool {
        false
    }
}

/// Which configured key encrypts new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySelection {
    /// The most recently added key (random encryption, default).
    #[default]
    Newest,
    /// The first configured key. Deterministic ciphertext stays identical across
    /// rotations, so unique indexes on it remain valid.
    Oldest,
}

impl KeySelection {
    pub(crate) fn pick<'a>(self, keys: &'a [EncryptionKey]) -> Option<&'a EncryptionKey> {
        match self {
            Self::Newest => keys.last(),
            Self::Oldest => keys.first(),
        }
    }
}

/// Orders `keys` (stored oldest first) for a decryption attempt: keys whose tag
/// matches the message come first, then the rest, each group newest first.
pub(crate) fn order_candidates(keys: &[EncryptionKey], tag: Option<&KeyTag>) -> Vec<EncryptionKey> {
    let newest_first = keys.iter().rev();
    match tag {
        Some(tag) => {
            let (matching, others): (Vec<_>, Vec<_>) =
                newest_first.cloned().partition(|key| key.tag() == tag);
            matching.into_iter().chain(others).collect()
        }
        None => newest_first.cloned().collect(),
    }
}

/// Derives keys from password-like secrets with PBKDF2.
///
/// Secrets are listed oldest first. Appending a secret rotates the key used
/// for new data while every older key stays available for decryption.
/// Keys are derived once, at construction.
pub struct DerivedSecretKeyProvider {
    keys: Vec<EncryptionKey>,
    selection: KeySelection,
    store_key_references: bool,
}

impl DerivedSecretKeyProvider {
    /// Derives one key per secret.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NoKeys` if `secrets` is empty and
    /// `KeyProviderError::InvalidKey` if any secret is empty.
    pub fn new<S: AsRef<str>>(
        secrets: &[S],
        salt: &str,
        iterations: u32,
    ) -> Result<Self, KeyProviderError> {
        if secrets.iter().any(|secret| secret.as_ref().is_empty()) {
            return Err(KeyProviderError::InvalidKey("empty secret".to_string()));
        }

        let keys = secrets
            .iter()
            .map(|secret| EncryptionKey::new(kdf::derive_key(secret.as_ref(), salt, iterations)))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_keys(keys)
    }

    /// Wraps already-derived keys, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::NoKeys` if `keys` is empty.
    pub fn from_keys(keys: Vec<EncryptionKey>) -> Result<Self, KeyProviderError> {
        if keys.is_empty() {
            return Err(KeyProviderError::NoKeys);
        }
        Ok(Self { keys, selection: KeySelection::Newest, store_key_references: false })
    }

    /// Sets which key encrypts new data.
    #[must_use]
    pub const fn with_key_selection(mut self, selection: KeySelection) -> Self {
        self.selection = selection;
        self
    }

    /// Enables writing the key tag into each message.
    #[must_use]
    pub const fn with_store_key_references(mut self, enabled: bool) -> Self {
        self.store_key_references = enabled;
        self
    }

    /// Returns the configured keys, oldest first.
    #[must_use]
    pub fn keys(&self) -> &[EncryptionKey] {
        &self.keys
    }
}

impl KeyProvider for DerivedSecretKeyProvider {
    fn encryption_key(&self) -> Result<EncryptionKey, KeyProviderError> {
        self.selection.pick(&self.keys).cloned().ok_or(KeyProviderError::NoKeys)
    }

    fn decryption_keys(
        &self,
        message: &EncryptedMessage,
    ) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        Ok(order_candidates(&self.keys, message.key_tag()))
    }

    fn query_keys(&self) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        Ok(order_candidates(&self.keys, None))
    }

    fn stores_key_references(&self) -> bool {
        self.store_key_references
    }
}

impl std::fmt::Debug for DerivedSecretKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedSecretKeyProvider")
            .field("keys", &self.keys)
            .field("selection", &self.selection)
            .field("store_key_references", &self.store_key_references)
            .finish()
    }
}
