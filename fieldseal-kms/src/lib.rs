//! AWS KMS key source for fieldseal.
//!
//! Application secrets are stored KMS-encrypted (for example in config or an
//! environment variable). [`KmsKeySource`] decrypts them through KMS and
//! expands each one into an AES-256 key. Wrap it in a
//! [`CachingKeyProvider`](fieldseal::cache::CachingKeyProvider) so KMS is only
//! contacted when the cache expires.
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldseal::prelude::*;
//! use fieldseal_kms::AwsKmsKeySource;
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = AwsKmsKeySource::from_base64_env(&["AQICAHh...", "AQICAHi..."])?;
//! let provider = CachingKeyProvider::new(source, CacheSettings::default());
//!
//! let config = EncryptionConfig::new("unused", "salt");
//! let scheme = EncryptionScheme::builder("ssn")
//!     .key_provider(Arc::new(provider))
//!     .build(&config)?;
//! # Ok(())
//! # }
//! ```
//!
//! # AWS Configuration
//!
//! [`AwsKmsKeySource::from_env`] uses the AWS SDK's default credential chain:
//! - Environment variables (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`)
//! - AWS credentials file (~/.aws/credentials)
//! - IAM instance profile or ECS task role
//! - Web identity token (for EKS)

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use fieldseal::cache::KeySource;
use fieldseal::error::KeyProviderError;
use fieldseal::kdf::expand_key;
use fieldseal::key::EncryptionKey;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::debug;
use zeroize::Zeroizing;

/// HKDF info string for keys expanded from KMS plaintext.
const KMS_KEY_INFO: &[u8] = b"fieldseal kms key";

/// Default deadline for decrypting the whole key set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors specific to KMS operations.
#[derive(Debug, Error)]
pub enum KmsError {
    /// AWS KMS API error
    #[error("KMS request failed: {0}")]
    Request(String),

    /// KMS answered without plaintext
    #[error("KMS returned no plaintext")]
    EmptyResponse,

    /// KMS did not answer within the deadline
    #[error("KMS did not answer within {0:?}")]
    Timeout(Duration),

    /// Wrapped secret rejected
    #[error("invalid wrapped secret: {0}")]
    InvalidSecret(String),

    /// Base64 decoding error
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Async runtime could not be started
    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl From<KmsError> for KeyProviderError {
    fn from(err: KmsError) -> Self {
        match err {
            KmsError::Timeout(after) => Self::Timeout(after),
            KmsError::InvalidSecret(msg) => Self::InvalidKey(msg),
            KmsError::Base64(e) => Self::InvalidKey(format!("base64: {e}")),
            KmsError::Request(_) | KmsError::EmptyResponse | KmsError::Runtime(_) => {
                Self::Unavailable(err.to_string())
            }
        }
    }
}

/// The KMS operation a key source needs.
#[async_trait]
pub trait KmsClient: Send + Sync + 'static {
    /// Decrypts a KMS ciphertext blob.
    ///
    /// # Errors
    ///
    /// Returns `KmsError::Request` if the call fails.
    async fn decrypt(&self, key_id: Option<&str>, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError>;
}

#[async_trait]
impl KmsClient for aws_sdk_kms::Client {
    async fn decrypt(&self, key_id: Option<&str>, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let response = Self::decrypt(self)
            .set_key_id(key_id.map(str::to_string))
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .send()
            .await
            .map_err(|e| KmsError::Request(DisplayErrorContext(&e).to_string()))?;

        let plaintext = response.plaintext().ok_or(KmsError::EmptyResponse)?;
        Ok(plaintext.as_ref().to_vec())
    }
}

/// Key source backed by KMS-encrypted secrets.
///
/// Secrets are listed oldest first. Each key is tagged by the digest of its
/// expanded secret, so adding or retiring a secret never changes the tag of
/// another key.
///
/// The source owns a single-threaded runtime and blocks on it in
/// [`fetch_keys`](KeySource::fetch_keys). It must not be called from inside
/// another async runtime.
pub struct KmsKeySource<C: KmsClient> {
    client: C,
    key_id: Option<String>,
    wrapped: Vec<Vec<u8>>,
    timeout: Duration,
    runtime: Runtime,
}

impl<C: KmsClient> KmsKeySource<C> {
    /// Creates a source over raw KMS ciphertext blobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `KmsError::InvalidSecret` if `wrapped` is empty and
    /// `KmsError::Runtime` if the runtime cannot be started.
    pub fn new(client: C, wrapped: Vec<Vec<u8>>) -> Result<Self, KmsError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Self::with_runtime(client, wrapped, runtime)
    }

    /// Creates a source over base64-encoded KMS ciphertext blobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `KmsError::Base64` for malformed input, otherwise as [`new`](Self::new).
    pub fn from_base64<S: AsRef<str>>(client: C, wrapped: &[S]) -> Result<Self, KmsError> {
        Self::new(client, decode_all(wrapped)?)
    }

    fn with_runtime(client: C, wrapped: Vec<Vec<u8>>, runtime: Runtime) -> Result<Self, KmsError> {
        if wrapped.is_empty() {
            return Err(KmsError::InvalidSecret("no wrapped secrets".to_string()));
        }
        if wrapped.iter().any(Vec::is_empty) {
            return Err(KmsError::InvalidSecret("empty wrapped secret".to_string()));
        }
        Ok(Self { client, key_id: None, wrapped, timeout: DEFAULT_TIMEOUT, runtime })
    }

    /// Pins decryption to a KMS key ID, ARN or alias.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Sets the deadline for decrypting the whole key set.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the number of wrapped secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wrapped.len()
    }

    /// Returns `true` if there are no wrapped secrets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wrapped.is_empty()
    }

    async fn decrypt_all(&self) -> Result<Vec<EncryptionKey>, KmsError> {
        let mut keys = Vec::with_capacity(self.wrapped.len());
        for blob in &self.wrapped {
            let secret = Zeroizing::new(self.client.decrypt(self.key_id.as_deref(), blob).await?);
            let key = expand_key(&secret, KMS_KEY_INFO)
                .and_then(EncryptionKey::new)
                .map_err(|e| KmsError::InvalidSecret(e.to_string()))?;
            keys.push(key);
        }
        Ok(keys)
    }
}

impl<C: KmsClient> KeySource for KmsKeySource<C> {
    fn fetch_keys(&self) -> Result<Vec<EncryptionKey>, KeyProviderError> {
        let keys = self
            .runtime
            .block_on(tokio::time::timeout(self.timeout, self.decrypt_all()))
            .map_err(|_| KmsError::Timeout(self.timeout))??;

        debug!(count = keys.len(), key_id = ?self.key_id, "decrypted key material from KMS");
        Ok(keys)
    }
}

impl<C: KmsClient> fmt::Debug for KmsKeySource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsKeySource")
            .field("key_id", &self.key_id)
            .field("secrets", &self.wrapped.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// [`KmsKeySource`] over the AWS SDK client.
pub type AwsKmsKeySource = KmsKeySource<aws_sdk_kms::Client>;

impl KmsKeySource<aws_sdk_kms::Client> {
    /// Creates a source with the default AWS configuration.
    ///
    /// # Errors
    ///
    /// Same as [`KmsKeySource::new`].
    pub fn from_env(wrapped: Vec<Vec<u8>>) -> Result<Self, KmsError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let config = runtime.block_on(aws_config::load_defaults(aws_config::BehaviorVersion::latest()));
        let client = aws_sdk_kms::Client::new(&config);
        Self::with_runtime(client, wrapped, runtime)
    }

    /// Like [`from_env`](Self::from_env), for base64-encoded blobs.
    ///
    /// # Errors
    ///
    /// Returns `KmsError::Base64` for malformed input, otherwise as [`from_env`](Self::from_env).
    pub fn from_base64_env<S: AsRef<str>>(wrapped: &[S]) -> Result<Self, KmsError> {
        Self::from_env(decode_all(wrapped)?)
    }
}

fn decode_all<S: AsRef<str>>(wrapped: &[S]) -> Result<Vec<Vec<u8>>, KmsError> {
    wrapped
        .iter()
        .map(|blob| STANDARD.decode(blob.as_ref().trim()).map_err(KmsError::from))
        .collect()
}
