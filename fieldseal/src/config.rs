//! Encryption configuration supplied by the host application.
//!
//! The library never reads configuration files or environment variables; the
//! application deserializes or builds an [`EncryptionConfig`] and passes it to
//! the scheme builder. A config is never mutated after schemes are built from
//! it. Reconfiguring means building a new config and new schemes, then swapping
//! them in a [`SchemeRegistry`](crate::registry::SchemeRegistry).

use crate::compressor::DEFAULT_COMPRESSION_THRESHOLD;
use crate::error::Error;
use crate::kdf::DEFAULT_ITERATIONS;
use serde::{Deserialize, Serialize};
use std::fmt;

const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Process-wide encryption settings.
///
/// # Example
///
/// ```
/// use fieldseal::config::EncryptionConfig;
///
/// let config = EncryptionConfig::new("primary-secret", "salt")
///     .with_deterministic_key("deterministic-secret")
///     .with_store_key_references(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// Secrets for non-deterministic encryption, oldest first; the last one encrypts.
    pub primary_key: Vec<String>,
    /// Secrets for deterministic encryption, oldest first.
    pub deterministic_key: Vec<String>,
    /// Salt for PBKDF2 key derivation.
    pub key_derivation_salt: String,
    /// PBKDF2 iteration count.
    pub key_derivation_iterations: u32,
    /// Write the tag of the encrypting key into each message (`kt` header).
    pub store_key_references: bool,
    /// Pass unparseable stored values through as plaintext and match them in queries.
    pub support_unencrypted_data: bool,
    /// Include previous deterministic schemes in equality-query candidates.
    pub extend_queries: bool,
    /// Compress payloads above `compression_threshold`.
    pub compress: bool,
    /// Minimum payload size in bytes before compression kicks in.
    pub compression_threshold: usize,
    /// Zlib compression level (0-9).
    pub compression_level: u32,
    /// Older key generations still needed to read existing data.
    pub previous: Vec<PreviousKeys>,
}

/// One retired generation of key material.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviousKeys {
    /// Retired primary secrets.
    pub primary_key: Vec<String>,
    /// Retired deterministic secrets.
    pub deterministic_key: Vec<String>,
    /// Salt used with these secrets; the current salt when absent.
    pub key_derivation_salt: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            primary_key: Vec::new(),
            deterministic_key: Vec::new(),
            key_derivation_salt: String::new(),
            key_derivation_iterations: DEFAULT_ITERATIONS,
            store_key_references: false,
            support_unencrypted_data: false,
            extend_queries: true,
            compress: true,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            previous: Vec::new(),
        }
    }
}

// Secrets are reported by count only.
impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("primary_keys", &self.primary_key.len())
            .field("deterministic_keys", &self.deterministic_key.len())
            .field("key_derivation_iterations", &self.key_derivation_iterations)
            .field("store_key_references", &self.store_key_references)
            .field("support_unencrypted_data", &self.support_unencrypted_data)
            .field("extend_queries", &self.extend_queries)
            .field("compress", &self.compress)
            .field("compression_threshold", &self.compression_threshold)
            .field("compression_level", &self.compression_level)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for PreviousKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviousKeys")
            .field("primary_keys", &self.primary_key.len())
            .field("deterministic_keys", &self.deterministic_key.len())
            .field("own_salt", &self.key_derivation_salt.is_some())
            .finish()
    }
}

impl EncryptionConfig {
    /// Creates a config with one primary secret and a derivation salt.
    #[must_use]
    pub fn new(primary_key: impl Into<String>, key_derivation_salt: impl Into<String>) -> Self {
        Self {
            primary_key: vec![primary_key.into()],
            key_derivation_salt: key_derivation_salt.into(),
            ..Self::default()
        }
    }

    /// Appends a primary secret; it becomes the one used for new encryptions.
    #[must_use]
    pub fn with_primary_key(mut self, secret: impl Into<String>) -> Self {
        self.primary_key.push(secret.into());
        self
    }

    /// Appends a deterministic secret.
    #[must_use]
    pub fn with_deterministic_key(mut self, secret: impl Into<String>) -> Self {
        self.deterministic_key.push(secret.into());
        self
    }

    /// Sets the PBKDF2 iteration count.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: u32) -> Self {
        self.key_derivation_iterations = iterations;
        self
    }

    /// Enables or disables writing key tags into messages.
    #[must_use]
    pub const fn with_store_key_references(mut self, enabled: bool) -> Self {
        self.store_key_references = enabled;
        self
    }

    /// Enables or disables pass-through of unencrypted legacy values.
    #[must_use]
    pub const fn with_support_unencrypted_data(mut self, enabled: bool) -> Self {
        self.support_unencrypted_data = enabled;
        self
    }

    /// Enables or disables previous schemes in equality queries.
    #[must_use]
    pub const fn with_extend_queries(mut self, enabled: bool) -> Self {
        self.extend_queries = enabled;
        self
    }

    /// Enables or disables compression.
    #[must_use]
    pub const fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Sets the compression threshold in bytes.
    #[must_use]
    pub const fn with_compression_threshold(mut self, threshold: usize) -> Self {
        self.compression_threshold = threshold;
        self
    }

    /// Adds a retired key generation.
    #[must_use]
    pub fn with_previous(mut self, previous: PreviousKeys) -> Self {
        self.previous.push(previous);
        self
    }

    /// Checks the settings that do not depend on a particular scheme.
    ///
    /// Missing key material is reported when a scheme needs it, since an
    /// application may use only deterministic or only random encryption.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an empty salt, zero iterations,
    /// an out-of-range compression level or empty secrets.
    pub fn validate(&self) -> Result<(), Error> {
        if self.key_derivation_salt.is_empty() {
            return Err(Error::Configuration("key_derivation_salt must not be empty".to_string()));
        }
        if self.key_derivation_iterations == 0 {
            return Err(Error::Configuration(
                "key_derivation_iterations must be positive".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(Error::Configuration(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }

        let mut all_secrets = self.primary_key.iter().chain(&self.deterministic_key).chain(
            self.previous.iter().flat_map(|p| p.primary_key.iter().chain(&p.deterministic_key)),
        );
        if all_secrets.any(String::is_empty) {
            return Err(Error::Configuration("secrets must not be empty".to_string()));
        }

        Ok(())
    }
}
