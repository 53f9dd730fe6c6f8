//! The encrypted message produced for every stored value.
//!
//! A message holds the AES-GCM output plus the headers needed to decrypt it:
//! - IV and authentication tag
//! - Compression flag
//! - Optional key tag (when key references are stored)
//! - Optional wrapped data key (envelope encryption)

use crate::cipher::{AUTH_TAG_SIZE, IV_SIZE};
use crate::key::KeyTag;

/// Version of the message layout written by this crate.
pub const SERIALIZER_VERSION: u8 = 1;

/// One encrypted value at one point in time.
///
/// Messages are never mutated; re-encryption builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    ciphertext: Vec<u8>,
    iv: [u8; IV_SIZE],
    auth_tag: [u8; AUTH_TAG_SIZE],
    compressed: bool,
    key_tag: Option<KeyTag>,
    wrapped_data_key: Option<Box<EncryptedMessage>>,
    serializer_version: u8,
}

impl EncryptedMessage {
    /// Creates a message from raw cipher output.
    #[must_use]
    pub const fn new(ciphertext: Vec<u8>, iv: [u8; IV_SIZE], auth_tag: [u8; AUTH_TAG_SIZE]) -> Self {
        Self {
            ciphertext,
            iv,
            auth_tag,
            compressed: false,
            key_tag: None,
            wrapped_data_key: None,
            serializer_version: SERIALIZER_VERSION,
        }
    }

    /// Marks the payload as compressed before encryption.
    #[must_use]
    pub const fn with_compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Records the tag of the key the payload was sealed with.
    #[must_use]
    pub fn with_key_tag(mut self, tag: KeyTag) -> Self {
        self.key_tag = Some(tag);
        self
    }

    /// Embeds the wrapped data key (envelope encryption).
    #[must_use]
    pub fn with_wrapped_data_key(mut self, wrapped: EncryptedMessage) -> Self {
        self.wrapped_data_key = Some(Box::new(wrapped));
        self
    }

    /// Returns the ciphertext.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Returns the IV.
    #[must_use]
    pub const fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Returns the authentication tag.
    #[must_use]
    pub const fn auth_tag(&self) -> &[u8; AUTH_TAG_SIZE] {
        &self.auth_tag
    }

    /// Returns `true` if the payload was compressed before encryption.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Returns the key tag, if key references are stored.
    #[must_use]
    pub const fn key_tag(&self) -> Option<&KeyTag> {
        self.key_tag.as_ref()
    }

    /// Returns the wrapped data key, for envelope-encrypted messages.
    #[must_use]
    pub fn wrapped_data_key(&self) -> Option<&EncryptedMessage> {
        self.wrapped_data_key.as_deref()
    }

    /// Returns the layout version.
    #[must_use]
    pub const fn serializer_version(&self) -> u8 {
        self.serializer_version
    }
}
