//! Per-attribute encryption schemes.
//!
//! A scheme bundles everything the engine needs to encrypt one attribute:
//! determinism, key provider, compressor, case normalization and the previous
//! schemes still needed to read older data. Schemes are built once from an
//! [`EncryptionConfig`] and shared read-only (`Arc`) afterwards.

use crate::compressor::{Compressor, ZlibCompressor};
use crate::config::{EncryptionConfig, PreviousKeys};
use crate::error::Error;
use crate::key_provider::{DerivedSecretKeyProvider, KeyProvider, KeySelection};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Immutable encryption settings for one attribute.
///
/// # Example
///
/// ```
/// use fieldseal::config::EncryptionConfig;
/// use fieldseal::scheme::EncryptionScheme;
///
/// let config = EncryptionConfig::new("primary", "salt")
///     .with_deterministic_key("deterministic")
///     .with_iterations(1_000);
///
/// let scheme = EncryptionScheme::builder("email")
///     .deterministic(true)
///     .downcase(true)
///     .build(&config)
///     .unwrap();
/// assert!(scheme.is_deterministic());
/// ```
pub struct EncryptionScheme {
    attribute_name: String,
    deterministic: bool,
    key_provider: Arc<dyn KeyProvider>,
    compressor: Option<Arc<dyn Compressor>>,
    compression_threshold: usize,
    downcase: bool,
    ignore_case: bool,
    support_unencrypted_data: bool,
    extend_queries: bool,
    previous: Vec<Arc<EncryptionScheme>>,
}

impl EncryptionScheme {
    /// Starts declaring a scheme for `attribute_name`.
    #[must_use]
    pub fn builder(attribute_name: impl Into<String>) -> SchemeBuilder {
        SchemeBuilder::new(attribute_name)
    }

    /// Returns the attribute name.
    #[must_use]
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Returns `true` for deterministic (queryable) encryption.
    #[must_use]
    pub const fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    /// Returns the key provider.
    #[must_use]
    pub fn key_provider(&self) -> &dyn KeyProvider {
        self.key_provider.as_ref()
    }

    /// Returns the compressor, if compression is enabled.
    #[must_use]
    pub fn compressor(&self) -> Option<&dyn Compressor> {
        self.compressor.as_deref()
    }

    /// Returns the payload size above which compression applies.
    #[must_use]
    pub const fn compression_threshold(&self) -> usize {
        self.compression_threshold
    }

    /// Returns `true` if values are lowercased before encryption.
    #[must_use]
    pub const fn downcase(&self) -> bool {
        self.downcase
    }

    /// Returns `true` if equality matching ignores case.
    #[must_use]
    pub const fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Returns `true` if unencrypted legacy values are tolerated.
    #[must_use]
    pub const fn support_unencrypted_data(&self) -> bool {
        self.support_unencrypted_data
    }

    /// Returns `true` if previous schemes take part in equality queries.
    #[must_use]
    pub const fn extend_queries(&self) -> bool {
        self.extend_queries
    }

    /// Returns the previous schemes, in declaration order.
    #[must_use]
    pub fn previous(&self) -> &[Arc<EncryptionScheme>] {
        &self.previous
    }

    /// Returns this scheme followed by all previous schemes, depth first.
    #[must_use]
    pub fn all_schemes(&self) -> Vec<&EncryptionScheme> {
        let mut schemes = vec![self];
        for previous in &self.previous {
            schemes.extend(previous.all_schemes());
        }
        schemes
    }

    /// Applies case normalization to a plaintext value.
    #[must_use]
    pub fn normalize<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if self.downcase || self.ignore_case {
            Cow::Owned(value.to_lowercase())
        } else {
            Cow::Borrowed(value)
        }
    }
}

impl fmt::Debug for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionScheme")
            .field("attribute_name", &self.attribute_name)
            .field("deterministic", &self.deterministic)
            .field("compressor", &self.compressor)
            .field("downcase", &self.downcase)
            .field("ignore_case", &self.ignore_case)
            .field("support_unencrypted_data", &self.support_unencrypted_data)
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}

/// Declaration of an [`EncryptionScheme`], turned into one by [`build`](Self::build).
#[derive(Clone)]
pub struct SchemeBuilder {
    attribute_name: String,
    deterministic: bool,
    fixed_key: bool,
    key_provider: Option<Arc<dyn KeyProvider>>,
    compressor: Option<Arc<dyn Compressor>>,
    compress: Option<bool>,
    downcase: bool,
    ignore_case: bool,
    support_unencrypted_data: Option<bool>,
    previous: Vec<SchemeBuilder>,
}

impl SchemeBuilder {
    fn new(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            deterministic: false,
            fixed_key: true,
            key_provider: None,
            compressor: None,
            compress: None,
            downcase: false,
            ignore_case: false,
            support_unencrypted_data: None,
            previous: Vec::new(),
        }
    }

    /// Enables deterministic encryption.
    #[must_use]
    pub const fn deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    /// For deterministic schemes: encrypt with the oldest configured key
    /// (`true`, default) or the newest one (`false`).
    ///
    /// Only affects the default key provider.
    #[must_use]
    pub const fn fixed_key(mut self, fixed: bool) -> Self {
        self.fixed_key = fixed;
        self
    }

    /// Uses a custom key provider instead of one derived from the config.
    #[must_use]
    pub fn key_provider(mut self, provider: Arc<dyn KeyProvider>) -> Self {
        self.key_provider = Some(provider);
        self
    }

    /// Uses a custom compressor.
    #[must_use]
    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(compressor);
        self.compress = Some(true);
        self
    }

    /// Disables compression for this attribute.
    #[must_use]
    pub fn without_compression(mut self) -> Self {
        self.compressor = None;
        self.compress = Some(false);
        self
    }

    /// Lowercases values before encryption. The original case is lost.
    #[must_use]
    pub const fn downcase(mut self, downcase: bool) -> Self {
        self.downcase = downcase;
        self
    }

    /// Matches case-insensitively. The ciphertext holds the lowercased value;
    /// keeping the original case is up to the caller.
    #[must_use]
    pub const fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    /// Overrides the config's `support_unencrypted_data` for this attribute.
    #[must_use]
    pub const fn support_unencrypted_data(mut self, enabled: bool) -> Self {
        self.support_unencrypted_data = Some(enabled);
        self
    }

    /// Adds a previous scheme still needed to read existing data.
    #[must_use]
    pub fn previous(mut self, previous: SchemeBuilder) -> Self {
        self.previous.push(previous);
        self
    }

    /// Validates the declaration and builds the scheme.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if:
    /// - the config is invalid or lacks the key material this scheme needs
    /// - `ignore_case` is set on a non-deterministic scheme
    /// - `downcase` and `ignore_case` are both set
    /// - a deterministic scheme uses a provider that cannot support it
    pub fn build(self, config: &EncryptionConfig) -> Result<Arc<EncryptionScheme>, Error> {
        config.validate()?;
        self.build_with(config, &config.previous)
    }

    fn build_with(
        self,
        config: &EncryptionConfig,
        generations: &[PreviousKeys],
    ) -> Result<Arc<EncryptionScheme>, Error> {
        if self.attribute_name.is_empty() {
            return Err(Error::Configuration("attribute name must not be empty".to_string()));
        }
        if self.ignore_case && !self.deterministic {
            return Err(Error::Configuration(format!(
                "{}: ignore_case requires deterministic encryption",
                self.attribute_name
            )));
        }
        if self.downcase && self.ignore_case {
            return Err(Error::Configuration(format!(
                "{}: downcase and ignore_case cannot be combined",
                self.attribute_name
            )));
        }

        let key_provider = match &self.key_provider {
            Some(provider) => Arc::clone(provider),
            None => self.default_provider(config, self.secrets(config), &config.key_derivation_salt)?,
        };
        if self.deterministic && !key_provider.supports_deterministic() {
            return Err(Error::Configuration(format!(
                "{}: key provider does not support deterministic encryption",
                self.attribute_name
            )));
        }

        let compressor = self.resolve_compressor(config);

        let mut previous = Vec::with_capacity(self.previous.len() + generations.len());
        for declared in &self.previous {
            let mut declared = declared.clone();
            declared.attribute_name.clone_from(&self.attribute_name);
            previous.push(declared.build_with(config, &[])?);
        }
        if self.key_provider.is_none() {
            for generation in generations {
                if let Some(scheme) = self.build_generation(config, generation, compressor.clone())? {
                    previous.push(scheme);
                }
            }
        }

        Ok(Arc::new(EncryptionScheme {
            attribute_name: self.attribute_name,
            deterministic: self.deterministic,
            key_provider,
            compressor,
            compression_threshold: config.compression_threshold,
            downcase: self.downcase,
            ignore_case: self.ignore_case,
            support_unencrypted_data: self
                .support_unencrypted_data
                .unwrap_or(config.support_unencrypted_data),
            extend_queries: config.extend_queries,
            previous,
        }))
    }

    fn secrets<'a>(&self, keys: &'a EncryptionConfig) -> &'a [String] {
        if self.deterministic {
            &keys.deterministic_key
        } else {
            &keys.primary_key
        }
    }

    fn resolve_compressor(&self, config: &EncryptionConfig) -> Option<Arc<dyn Compressor>> {
        if !self.compress.unwrap_or(config.compress) {
            return None;
        }
        Some(
            self.compressor
                .clone()
                .unwrap_or_else(|| Arc::new(ZlibCompressor::new(config.compression_level))),
        )
    }

    fn default_provider(
        &self,
        config: &EncryptionConfig,
        secrets: &[String],
        salt: &str,
    ) -> Result<Arc<dyn KeyProvider>, Error> {
        if secrets.is_empty() {
            let setting = if self.deterministic { "deterministic_key" } else { "primary_key" };
            return Err(Error::Configuration(format!(
                "{}: no {setting} configured",
                self.attribute_name
            )));
        }

        let selection = if self.deterministic && self.fixed_key {
            KeySelection::Oldest
        } else {
            KeySelection::Newest
        };

        let provider = DerivedSecretKeyProvider::new(secrets, salt, config.key_derivation_iterations)?
            .with_key_selection(selection)
            .with_store_key_references(config.store_key_references);
        Ok(Arc::new(provider))
    }

    // A retired key generation becomes a previous scheme with the same flags.
    fn build_generation(
        &self,
        config: &EncryptionConfig,
        generation: &PreviousKeys,
        compressor: Option<Arc<dyn Compressor>>,
    ) -> Result<Option<Arc<EncryptionScheme>>, Error> {
        let secrets =
            if self.deterministic { &generation.deterministic_key } else { &generation.primary_key };
        if secrets.is_empty() {
            return Ok(None);
        }

        let salt = generation.key_derivation_salt.as_deref().unwrap_or(&config.key_derivation_salt);
        let key_provider = self.default_provider(config, secrets, salt)?;

        Ok(Some(Arc::new(EncryptionScheme {
            attribute_name: self.attribute_name.clone(),
            deterministic: self.deterministic,
            key_provider,
            compressor,
            compression_threshold: config.compression_threshold,
            downcase: self.downcase,
            ignore_case: self.ignore_case,
            support_unencrypted_data: self
                .support_unencrypted_data
                .unwrap_or(config.support_unencrypted_data),
            extend_queries: config.extend_queries,
            previous: Vec::new(),
        })))
    }
}

impl fmt::Debug for SchemeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeBuilder")
            .field("attribute_name", &self.attribute_name)
            .field("deterministic", &self.deterministic)
            .field("custom_key_provider", &self.key_provider.is_some())
            .field("previous", &self.previous)
            .finish_non_exhaustive()
    }
}
