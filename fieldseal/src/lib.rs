//! # `fieldseal`
//!
//! Transparent field-level encryption for database columns, with
//! deterministic encryption for equality queries and key rotation without
//! data migration.
//!
//! ## Features
//!
//! - AES-256-GCM authenticated encryption
//! - Deterministic mode (HMAC-derived IV) for equality queries
//! - Key rotation: old keys and previous schemes keep decrypting existing data
//! - Envelope encryption with per-message data keys
//! - Optional zlib compression of large values
//! - Caching key provider for remote key sources
//!
//! ## Example
//!
//! ```
//! use fieldseal::prelude::*;
//!
//! let config = EncryptionConfig::new("primary-secret", "salt")
//!     .with_deterministic_key("deterministic-secret")
//!     .with_iterations(1_000);
//! let email = EncryptionScheme::builder("email").deterministic(true).build(&config).unwrap();
//!
//! let engine = EncryptionEngine::new();
//! let stored = engine.encrypt("alice@example.com", &email).unwrap();
//! assert_eq!(engine.decrypt(&stored, &email).unwrap(), "alice@example.com");
//!
//! let candidates = QueryRewriter::new(engine).rewrite_equality_query("alice@example.com", &email).unwrap();
//! assert!(candidates.contains(&stored));
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod cipher;
pub mod codec;
pub mod compressor;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod key;
pub mod key_provider;
pub mod message;
pub mod query;
pub mod registry;
pub mod scheme;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::cache::{CacheSettings, CachingKeyProvider, KeySource};
    pub use crate::compressor::{Compressor, ZlibCompressor};
    pub use crate::config::{EncryptionConfig, PreviousKeys};
    pub use crate::engine::EncryptionEngine;
    pub use crate::envelope::EnvelopeEncryptionKeyProvider;
    pub use crate::error::{Error, KeyProviderError};
    pub use crate::key::{EncryptionKey, KeyTag};
    pub use crate::key_provider::{DerivedSecretKeyProvider, KeyProvider, KeySelection};
    pub use crate::message::EncryptedMessage;
    pub use crate::query::QueryRewriter;
    pub use crate::registry::SchemeRegistry;
    pub use crate::scheme::{EncryptionScheme, SchemeBuilder};
}
