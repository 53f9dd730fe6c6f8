//! Error types for `fieldseal` operations.

use std::fmt;
use std::time::Duration;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for `fieldseal` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing key material or an invalid scheme declaration.
    ///
    /// Always a programmer or operator error; retrying will not help.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The stored value is not a recognized encrypted message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Valid message structure, but no candidate key could authenticate it
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Key material could not be fetched right now (KMS timeout, network failure).
    #[error("key provider unavailable: {0}")]
    KeyProviderUnavailable(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl Error {
    /// Returns `true` when the failure is transient and the call may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::KeyProviderUnavailable(_))
    }
}

/// Errors specific to key provider operations.
#[derive(Debug)]
pub enum KeyProviderError {
    /// No keys configured
    NoKeys,

    /// Key material rejected (wrong length, empty secret)
    InvalidKey(String),

    /// Remote key source failed
    Unavailable(String),

    /// Remote key source did not answer within the deadline
    Timeout(Duration),

    /// Data key wrapping failed
    WrapFailed(String),

    /// Data key unwrapping failed
    UnwrapFailed(String),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKeys => write!(f, "no keys configured"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
            Self::Unavailable(msg) => write!(f, "key source unavailable: {msg}"),
            Self::Timeout(after) => write!(f, "key fetch timed out after {after:?}"),
            Self::WrapFailed(msg) => write!(f, "data key wrap failed: {msg}"),
            Self::UnwrapFailed(msg) => write!(f, "data key unwrap failed: {msg}"),
        }
    }
}

impl std::error::Error for KeyProviderError {}

impl From<KeyProviderError> for Error {
    fn from(err: KeyProviderError) -> Self {
        match err {
            KeyProviderError::NoKeys | KeyProviderError::InvalidKey(_) => {
                Self::Configuration(err.to_string())
            }
            KeyProviderError::Unavailable(_) | KeyProviderError::Timeout(_) => {
                Self::KeyProviderUnavailable(err.to_string())
            }
            KeyProviderError::WrapFailed(_) => Self::Encryption(err.to_string()),
            KeyProviderError::UnwrapFailed(_) => Self::Decryption(err.to_string()),
        }
    }
}
